use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::{Access, Error, Tool, ToolOutput};

pub(crate) type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolOutput> + Send>>;

/// A decoded call whose handler has not started yet.
pub(crate) struct PreparedCall {
    pub access: Access,
    run: Box<dyn FnOnce() -> BoxedToolFuture + Send>,
}

impl PreparedCall {
    /// Starts the handler. Must only be called once every policy check
    /// has passed.
    #[inline]
    pub fn run(self) -> BoxedToolFuture {
        (self.run)()
    }
}

pub(crate) trait ToolObject: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameter_schema(&self) -> &Value;

    fn prepare(self: Arc<Self>, arguments: Value) -> Result<PreparedCall, Error>;
}

pub(crate) struct ToolObjectImpl<T: Tool>(pub T);

impl<T: Tool> ToolObject for ToolObjectImpl<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn prepare(self: Arc<Self>, arguments: Value) -> Result<PreparedCall, Error> {
        if let Value::String(raw) = &arguments {
            // The provider could not decode the arguments as JSON.
            return Err(Error::invalid_input()
                .with_reason(format!("arguments are not valid JSON: {raw}")));
        }
        let input: T::Input = serde_json::from_value(arguments)
            .map_err(|err| Error::invalid_input().with_reason(format!("{err}")))?;
        self.0.validate(&input)?;
        let access = self.0.access(&input);
        Ok(PreparedCall {
            access,
            run: Box::new(move || Box::pin(self.0.execute(input))),
        })
    }
}
