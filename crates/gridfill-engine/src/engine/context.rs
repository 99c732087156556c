//! Chained variable scopes for loop and group bindings.
//!
//! Scopes live in an index-addressed arena: each frame stores its parent's
//! index, and a frame is never mutated once pushed. Lookups walk from a frame
//! toward the root. The transform engine pushes a frame per iteration and
//! releases it when the iteration's subtree is rendered, so the arena behaves
//! like a stack and sibling iterations cannot see each other's bindings.

use std::collections::HashMap;

use super::eval::Resolver;
use super::{ConfigError, Value};

/// Handle to one frame of a [`Context`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct Frame {
    parent: Option<ScopeId>,
    bindings: HashMap<String, Value>,
}

/// Arena of immutable binding frames.
#[derive(Debug)]
pub struct Context {
    frames: Vec<Frame>,
}

impl Context {
    /// Create a context whose root frame holds `bindings`.
    pub fn new<I>(bindings: I) -> Context
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Context {
            frames: vec![Frame {
                parent: None,
                bindings: bindings.into_iter().collect(),
            }],
        }
    }

    /// Root frame from fill data, which must be a mapping.
    pub fn from_data(data: &Value) -> Result<Context, ConfigError> {
        match data {
            Value::Mapping(map) => Ok(Context::new(
                map.iter().map(|(k, v)| (k.clone(), v.clone())),
            )),
            Value::Null => Ok(Context::new(std::iter::empty())),
            other => Err(ConfigError::InvalidData(format!(
                "fill data must be a mapping, found {}",
                other.kind()
            ))),
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Push a child frame of `parent`.
    pub fn push<I>(&mut self, parent: ScopeId, bindings: I) -> ScopeId
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.frames.push(Frame {
            parent: Some(parent),
            bindings: bindings.into_iter().collect(),
        });
        ScopeId(self.frames.len() - 1)
    }

    /// Drop `scope` and every frame pushed after it. The root is never dropped.
    pub fn release(&mut self, scope: ScopeId) {
        let keep = scope.0.max(1);
        self.frames.truncate(keep);
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.frames.get(id.0)?;
            if let Some(value) = frame.bindings.get(name) {
                return Some(value);
            }
            current = frame.parent;
        }
        None
    }

    pub fn view(&self, scope: ScopeId) -> ScopeView<'_> {
        ScopeView {
            context: self,
            scope,
        }
    }
}

/// A [`Resolver`] rooted at one frame.
pub struct ScopeView<'a> {
    context: &'a Context,
    scope: ScopeId,
}

impl Resolver for ScopeView<'_> {
    fn resolve(&self, name: &str) -> Option<&Value> {
        self.context.lookup(self.scope, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, value: Value) -> (String, Value) {
        (name.to_string(), value)
    }

    #[test]
    fn test_lookup_walks_outward_and_shadows() {
        let mut ctx = Context::new([binding("x", Value::from(1i64)), binding("y", Value::from("root"))]);
        let child = ctx.push(ctx.root(), [binding("x", Value::from(2i64))]);
        assert_eq!(ctx.lookup(child, "x"), Some(&Value::Number(2.0)));
        assert_eq!(ctx.lookup(child, "y"), Some(&Value::from("root")));
        assert_eq!(ctx.lookup(ctx.root(), "x"), Some(&Value::Number(1.0)));
        assert_eq!(ctx.lookup(child, "z"), None);
    }

    #[test]
    fn test_sibling_iterations_do_not_leak() {
        let mut ctx = Context::new([]);
        let first = ctx.push(ctx.root(), [binding("e", Value::from("a"))]);
        assert!(ctx.lookup(first, "e").is_some());
        ctx.release(first);
        let second = ctx.push(ctx.root(), [binding("i", Value::from(1i64))]);
        assert_eq!(ctx.lookup(second, "e"), None);
        assert_eq!(ctx.frames.len(), 2);
    }

    #[test]
    fn test_release_never_drops_root() {
        let mut ctx = Context::new([binding("x", Value::Null)]);
        ctx.release(ctx.root());
        assert_eq!(ctx.frames.len(), 1);
        assert_eq!(ctx.lookup(ctx.root(), "x"), Some(&Value::Null));
    }

    #[test]
    fn test_from_data_requires_mapping() {
        assert!(Context::from_data(&Value::from("nope")).is_err());
        let ctx = Context::from_data(&Value::mapping([("a", Value::Bool(true))])).unwrap();
        assert_eq!(ctx.view(ctx.root()).resolve("a"), Some(&Value::Bool(true)));
    }
}
