//! Service operations and their dispatch.
//!
//! A request names a service through the `service` parameter, e.g.
//! `service=create-item`. The token is turned into an operation name by
//! camel-casing it and appending [`SERVICE_SUFFIX`] (`createItemService`), and
//! that name is looked up in the controller type's [`ServiceRegistry`]. Only
//! operations registered under a name ending in the suffix can ever be reached.
//!
//! What an operation returns decides how the request ends:
//!
//! | [`ServiceOutcome`] | Reply                                        |
//! |--------------------|----------------------------------------------|
//! | `FallThrough`      | the page is rendered as usual                |
//! | `Finished`         | `200` with an empty body                     |
//! | `Json(value)`      | `200`, `application/json`                    |
//! | `Text(text)`       | `200`, `text/plain`, trimmed                 |
//! | `Redirect(r)`      | `302` / `301` (`204` for fetch clients)      |
//!
//! Failures are classified in one place, [`ServiceError::into_reply`]:
//! validation failures answer `406` (`409` for uniqueness conflicts), anything
//! else is an unexpected failure and answers `500`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::binder::{BindError, BoundArgs, Converters, MethodSignature, bind};
use crate::config::Mode;
use crate::context::RequestContext;
use crate::controller::{Page, Redirect, Reply};
use crate::http::StatusCode;
use crate::template::RenderError;

/// Every service operation name ends with this suffix.
pub const SERVICE_SUFFIX: &str = "Service";

/// Body of the `404` sent for tokens that name no operation.
pub const UNKNOWN_SERVICE: &str = "Unknown service!";

const GENERIC_FAILURE: &str = "Internal Server Error";

/// Maps a request token to its operation name.
///
/// ```
/// use simplectl::service::service_method_name;
///
/// assert_eq!(service_method_name("create-item"), "createItemService");
/// assert_eq!(service_method_name("save_user"), "saveUserService");
/// assert_eq!(service_method_name("list"), "listService");
/// ```
pub fn service_method_name(token: &str) -> String {
    let mut name = String::with_capacity(token.len() + SERVICE_SUFFIX.len());
    let parts = token.split(['-', '_']).filter(|part| !part.is_empty());

    for (i, part) in parts.enumerate() {
        if i == 0 {
            name.push_str(part);
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }

    name.push_str(SERVICE_SUFFIX);
    name
}

/// Errors a service operation (or the page render hook) may raise.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The input was rejected. Answered with `406`, or `409` when `conflict` is set.
    #[error("{message}")]
    Validation {
        message: String,
        /// Field name → error, sent as JSON when non-empty.
        errors: Map<String, Value>,
        conflict: bool,
    },

    /// Anything else. Answered with `500`.
    #[error("unexpected service failure: {0}")]
    Unexpected(Box<dyn std::error::Error + Send + Sync>),
}

impl ServiceError {
    /// A validation failure without field errors.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Map::new(),
            conflict: false,
        }
    }

    /// A uniqueness violation.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Map::new(),
            conflict: true,
        }
    }

    pub fn unexpected(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unexpected(err.into())
    }

    /// Adds a field error to a validation failure. Other errors are returned unchanged.
    ///
    /// ```
    /// use simplectl::service::ServiceError;
    ///
    /// let err = ServiceError::invalid("check your input").with_field("email", "is required");
    /// assert_eq!(err.to_string(), "check your input");
    /// ```
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, message: impl Into<Value>) -> Self {
        if let Self::Validation { errors, .. } = &mut self {
            errors.insert(field.into(), message.into());
        }
        self
    }

    /// Turns the failure into the reply sent to the client.
    ///
    /// Unexpected failures are always logged; only development mode puts the
    /// diagnostic in the body.
    pub fn into_reply(self, mode: Mode) -> Reply {
        match self {
            Self::Validation {
                message,
                errors,
                conflict,
            } => {
                let status = if conflict {
                    StatusCode::Conflict
                } else {
                    StatusCode::NotAcceptable
                };
                warn!(status = status.as_u16(), %message, fields = errors.len(), "service input rejected");
                if errors.is_empty() {
                    Reply::text(status, message)
                } else {
                    Reply::json(status, Value::Object(errors))
                }
            }
            unexpected => {
                error!(error = %unexpected, "service failed");
                let body = if mode.is_development() {
                    format!("{unexpected:#?}")
                } else {
                    GENERIC_FAILURE.to_owned()
                };
                Reply::text(StatusCode::InternalServerError, body)
            }
        }
    }
}

impl From<BindError> for ServiceError {
    fn from(err: BindError) -> Self {
        Self::Unexpected(Box::new(err))
    }
}

impl From<RenderError> for ServiceError {
    fn from(err: RenderError) -> Self {
        Self::Unexpected(Box::new(err))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unexpected(Box::new(err))
    }
}

/// How a service operation wants the request to end.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceOutcome {
    /// Continue with normal page rendering.
    FallThrough,
    /// The operation is done; answer `200` with no body.
    Finished,
    Json(Value),
    Text(String),
    Redirect(Redirect),
}

impl ServiceOutcome {
    /// Serializes `value` into a JSON outcome.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ServiceError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// The terminating reply, or `None` for [`FallThrough`](Self::FallThrough).
    pub fn into_reply(self) -> Option<Reply> {
        match self {
            Self::FallThrough => None,
            Self::Finished => Some(Reply::empty()),
            Self::Json(value) => Some(Reply::json(StatusCode::Ok, value)),
            Self::Text(text) => Some(Reply::text(StatusCode::Ok, text)),
            Self::Redirect(redirect) => Some(Reply::Redirect(redirect)),
        }
    }
}

/// `true` and `false` both fall through to rendering.
impl From<bool> for ServiceOutcome {
    fn from(_: bool) -> Self {
        Self::FallThrough
    }
}

impl From<()> for ServiceOutcome {
    fn from(_: ()) -> Self {
        Self::Finished
    }
}

/// Arrays and objects become JSON, other scalars text.
impl From<Value> for ServiceOutcome {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Finished,
            Value::Bool(_) => Self::FallThrough,
            Value::String(s) => Self::Text(s),
            Value::Number(n) => Self::Text(n.to_string()),
            structured => Self::Json(structured),
        }
    }
}

impl From<String> for ServiceOutcome {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ServiceOutcome {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Redirect> for ServiceOutcome {
    fn from(redirect: Redirect) -> Self {
        Self::Redirect(redirect)
    }
}

/// Errors raised while registering operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service operation `{name}` must end with `Service`")]
    MissingSuffix { name: String },

    #[error("service operation `{name}` is already registered")]
    Duplicate { name: String },
}

type Handler<C> =
    dyn Fn(&mut C, &mut Page, &BoundArgs) -> Result<ServiceOutcome, ServiceError> + Send + Sync;

/// One registered operation.
pub struct Service<C> {
    signature: MethodSignature,
    handler: Arc<Handler<C>>,
}

impl<C> Service<C> {
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }
}

/// The statically declared operations of one controller type.
///
/// ```
/// use simplectl::binder::{MethodSignature, ParamSpec};
/// use simplectl::service::{ServiceError, ServiceRegistry};
/// use serde_json::{json, Value};
///
/// struct Users;
///
/// let mut registry = ServiceRegistry::<Users>::new();
/// registry
///     .register(
///         "getUserService",
///         MethodSignature::new().param(ParamSpec::int("id")),
///         |_users: &mut Users, _page, args| -> Result<Value, ServiceError> {
///             Ok(json!({ "id": args.int("id") }))
///         },
///     )
///     .unwrap();
///
/// assert!(registry.contains("getUserService"));
/// assert!(registry.register("getUser", MethodSignature::new(), |_: &mut Users, _, _| Ok(true)).is_err());
/// ```
pub struct ServiceRegistry<C> {
    services: HashMap<String, Service<C>>,
    converters: Converters,
}

impl<C> Default for ServiceRegistry<C> {
    fn default() -> Self {
        Self {
            services: HashMap::new(),
            converters: Converters::new(),
        }
    }
}

impl<C> fmt::Debug for ServiceRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ServiceRegistry")
            .field("services", &names)
            .field("converters", &self.converters)
            .finish()
    }
}

impl<C> ServiceRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation under `name`, which must end in [`SERVICE_SUFFIX`].
    ///
    /// The handler may return anything convertible into a [`ServiceOutcome`]:
    /// `bool`, `()`, `String`, `serde_json::Value`, a [`Redirect`], or the
    /// outcome itself.
    pub fn register<F, O>(
        &mut self,
        name: impl Into<String>,
        signature: MethodSignature,
        handler: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&mut C, &mut Page, &BoundArgs) -> Result<O, ServiceError> + Send + Sync + 'static,
        O: Into<ServiceOutcome>,
    {
        let name = name.into();
        if name.len() <= SERVICE_SUFFIX.len() || !name.ends_with(SERVICE_SUFFIX) {
            return Err(RegistryError::MissingSuffix { name });
        }
        if self.services.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }

        let handler: Arc<Handler<C>> = Arc::new(
            move |controller: &mut C,
                  page: &mut Page,
                  args: &BoundArgs|
                  -> Result<ServiceOutcome, ServiceError> {
                handler(controller, page, args).map(Into::into)
            },
        );
        self.services.insert(name, Service { signature, handler });
        Ok(self)
    }

    pub fn converters(&self) -> &Converters {
        &self.converters
    }

    /// Converters for domain-typed parameters of every operation.
    pub fn converters_mut(&mut self) -> &mut Converters {
        &mut self.converters
    }

    pub fn get(&self, name: &str) -> Option<&Service<C>> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

/// Outcome of [`dispatch`].
#[derive(Debug)]
pub enum DispatchResult {
    /// The request names no service.
    NoService,
    /// A service ran and asked for the page to be rendered.
    FallThrough,
    /// The request is answered; nothing else may run.
    Handled(Reply),
}

/// Runs the service named by `ctx`, if any.
///
/// Binding, invocation and classification errors all end up as a
/// [`DispatchResult::Handled`] reply; nothing escapes to the transport.
pub fn dispatch<C>(
    registry: &ServiceRegistry<C>,
    controller: &mut C,
    page: &mut Page,
    ctx: &RequestContext,
) -> DispatchResult {
    let Some(token) = ctx.service() else {
        return DispatchResult::NoService;
    };

    let method = service_method_name(token);
    let Some(service) = registry.get(&method) else {
        debug!(service = token, %method, "unknown service");
        return DispatchResult::Handled(Reply::text(StatusCode::NotFound, UNKNOWN_SERVICE));
    };

    debug!(service = token, %method, "dispatching service");
    let result = bind(&service.signature, ctx.params(), &registry.converters)
        .map_err(ServiceError::from)
        .and_then(|args| (service.handler)(controller, page, &args));

    match result {
        Ok(outcome) => match outcome.into_reply() {
            Some(reply) => DispatchResult::Handled(reply),
            None => DispatchResult::FallThrough,
        },
        Err(err) => DispatchResult::Handled(err.into_reply(page.mode())),
    }
}
