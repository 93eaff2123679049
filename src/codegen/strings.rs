//! Module-level string constants.

use std::collections::HashMap;

use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::values::{GlobalValue, PointerValue};
use inkwell::AddressSpace;

/// Private, null-terminated string globals, deduplicated per module.
///
/// A logical name maps to one global per distinct value. Asking for the same
/// name and value again reuses the global; a new value under a taken name is
/// emitted as `name.N`.
#[derive(Debug, Default)]
pub(super) struct StringPool<'ctx> {
    globals: HashMap<(String, String), GlobalValue<'ctx>>,
    taken: HashMap<String, usize>,
    counter: usize,
}

impl<'ctx> StringPool<'ctx> {
    pub fn intern(
        &mut self,
        ctx: &'ctx Context,
        module: &Module<'ctx>,
        name: &str,
        value: &str,
    ) -> PointerValue<'ctx> {
        let key = (name.to_string(), value.to_string());
        if let Some(global) = self.globals.get(&key) {
            return global.as_pointer_value();
        }

        let symbol = if self.taken.contains_key(name) {
            self.counter += 1;
            format!("{name}.{}", self.counter)
        } else {
            name.to_string()
        };
        *self.taken.entry(name.to_string()).or_default() += 1;

        let init = ctx.const_string(value.as_bytes(), true);
        let global = module.add_global(init.get_type(), Some(AddressSpace::default()), &symbol);
        global.set_initializer(&init);
        global.set_constant(true);
        global.set_linkage(Linkage::Private);
        global.set_unnamed_addr(true);

        self.globals.insert(key, global);
        global.as_pointer_value()
    }

    /// Number of globals emitted under a logical name.
    #[cfg(test)]
    fn count(&self, name: &str) -> usize {
        self.taken.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_and_value_is_created_once() {
        let ctx = Context::create();
        let module = ctx.create_module("strings");
        let mut pool = StringPool::default();

        let first = pool.intern(&ctx, &module, ".fmt.str", "%s");
        let again = pool.intern(&ctx, &module, ".fmt.str", "%s");
        assert_eq!(first, again);
        assert_eq!(pool.count(".fmt.str"), 1);
    }

    #[test]
    fn new_values_under_a_taken_name_get_a_suffix() {
        let ctx = Context::create();
        let module = ctx.create_module("strings");
        let mut pool = StringPool::default();

        pool.intern(&ctx, &module, ".str", "hello");
        pool.intern(&ctx, &module, ".str", "world");
        pool.intern(&ctx, &module, ".str", "hello");

        assert!(module.get_global(".str").is_some());
        assert!(module.get_global(".str.1").is_some());
        assert!(module.get_global(".str.2").is_none());
        assert_eq!(pool.count(".str"), 2);
    }

    #[test]
    fn globals_are_null_terminated_constants() {
        let ctx = Context::create();
        let module = ctx.create_module("strings");
        let mut pool = StringPool::default();
        pool.intern(&ctx, &module, ".str", "hi");

        let ir = module.print_to_string().to_string();
        assert!(ir.contains(r#"private unnamed_addr constant [3 x i8] c"hi\00""#));
    }
}
