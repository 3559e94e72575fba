//! IR module definition representing a compilation unit.

use std::fmt;

use crate::{FuncId, Function};

/// An interned literal string, emitted by the code generator into a
/// read-only data section. Ids are dense and assigned in order of first
/// appearance within the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringResource {
    pub text: String,
    pub id: u32,
}

/// A complete IR module.
///
/// Functions appear in lexical-nesting order of the source; the first
/// function is the global (top-level) script body.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub resources: Vec<StringResource>,
}

impl Module {
    pub fn new() -> Self {
        Module {
            functions: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn push_function(&mut self, function: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn push_resource(&mut self, resource: StringResource) {
        self.resources.push(resource);
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for resource in &self.resources {
            writeln!(f, "string {} {:?}", resource.id, resource.text)?;
        }
        if !self.resources.is_empty() {
            writeln!(f)?;
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_find() {
        let mut module = Module::new();
        let id = module.push_function(Function::new("main", true));
        assert_eq!(id, FuncId(0));
        assert!(module.find_function("main").is_some());
        assert!(module.find_function("other").is_none());
        assert!(module.function(id).is_global);
    }

    #[test]
    fn test_display_resources() {
        let mut module = Module::new();
        module.push_resource(StringResource {
            text: "foo".to_string(),
            id: 0,
        });
        let dump = module.to_string();
        assert!(dump.contains("string 0 \"foo\""));
    }
}
