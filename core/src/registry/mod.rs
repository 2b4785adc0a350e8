//! Explicit service registration and method resolution.
//!
//! A [`Service`] is built from a receiver and a list of typed handlers. Every handler is stored
//! behind a [`MethodDescriptor`] that knows how to decode raw params into the handler's argument
//! tuple, so resolution never inspects types at request time.
//!
//! The [`ServiceRegistry`] is filled during startup through `&mut` access and shared as
//! `Arc<ServiceRegistry>` afterwards, which keeps it read only for the rest of the process.

use futures::{future::BoxFuture, FutureExt};
use serde_json::value::RawValue;
use std::{collections::HashMap, fmt, future::Future, sync::Arc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

use crate::{
	codec::{Incoming, RequestId},
	errors::{RegistryError, RpcError, SERVICE_METHOD_SEPARATOR},
	types::SubscriptionId,
};

mod params;
mod reply;

pub use params::{decode as decode_params, ParamSpec, Params};
pub use reply::{EmptyValue, IntoReply, Partial, Reply, ReturnShape};

pub const DEFAULT_SERVICE_VERSION: &str = "1.0";

/// Lifetime of the request being served.
///
/// Cancelled once the connection that carried the request is closed.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
	token: CancellationToken,
}

impl CallContext {
	pub fn new(token: CancellationToken) -> Self {
		CallContext { token }
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
		self.token.cancelled()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
	Callback,
	Subscription,
}

pub type Invocation = BoxFuture<'static, Reply>;

type BindFn =
	Box<dyn Fn(CallContext, Option<&RawValue>) -> Result<Invocation, RpcError> + Send + Sync>;

/// Everything needed to call one registered method.
pub struct MethodDescriptor {
	pub name: String,
	pub params: Vec<ParamSpec>,
	pub requires_context: bool,
	pub returns: ReturnShape,
	pub kind: MethodKind,
	bind: BindFn,
}

impl MethodDescriptor {
	/// Decodes `params` and prepares the call. Nothing runs until the invocation is awaited.
	pub fn bind(
		&self,
		context: CallContext,
		params: Option<&RawValue>,
	) -> Result<Invocation, RpcError> {
		(self.bind)(context, params)
	}
}

impl fmt::Debug for MethodDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MethodDescriptor")
			.field("name", &self.name)
			.field("params", &self.params)
			.field("requires_context", &self.requires_context)
			.field("returns", &self.returns)
			.field("kind", &self.kind)
			.finish()
	}
}

/// Externally visible method name: first character lower-cased.
///
/// Names containing the separator could never be addressed on the wire.
fn exported_name(name: &str) -> Option<String> {
	if name.contains(SERVICE_METHOD_SEPARATOR) {
		return None;
	}
	let mut chars = name.chars();
	let first = chars.next()?;
	Some(first.to_lowercase().chain(chars).collect())
}

/// Registration input: a named receiver and the handlers it exposes.
pub struct Service {
	name: String,
	version: String,
	public: bool,
	callbacks: Vec<MethodDescriptor>,
	subscriptions: Vec<MethodDescriptor>,
}

impl Service {
	pub fn builder<R: Send + Sync + 'static>(name: &str, receiver: Arc<R>) -> ServiceBuilder<R> {
		ServiceBuilder {
			service: Service {
				name: name.to_string(),
				version: DEFAULT_SERVICE_VERSION.to_string(),
				public: true,
				callbacks: vec![],
				subscriptions: vec![],
			},
			receiver,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

pub struct ServiceBuilder<R> {
	service: Service,
	receiver: Arc<R>,
}

impl<R: Send + Sync + 'static> ServiceBuilder<R> {
	pub fn version(mut self, version: &str) -> Self {
		self.service.version = version.to_string();
		self
	}

	/// Marks the receiver as internal. Registering it fails.
	pub fn private(mut self) -> Self {
		self.service.public = false;
		self
	}

	/// Plain callback without call context.
	pub fn method<P, F, Fut>(self, name: &str, handler: F) -> Self
	where
		P: Params,
		F: Fn(Arc<R>, P) -> Fut + Send + Sync + 'static,
		Fut: Future + Send + 'static,
		Fut::Output: IntoReply,
	{
		self.add_callback::<P, Fut::Output, _>(name, false, move |receiver, _, params| {
			handler(receiver, params).map(IntoReply::into_reply).boxed()
		})
	}

	/// Plain callback receiving the request's [`CallContext`] first.
	pub fn method_with_context<P, F, Fut>(self, name: &str, handler: F) -> Self
	where
		P: Params,
		F: Fn(Arc<R>, CallContext, P) -> Fut + Send + Sync + 'static,
		Fut: Future + Send + 'static,
		Fut::Output: IntoReply,
	{
		self.add_callback::<P, Fut::Output, _>(name, true, move |receiver, context, params| {
			handler(receiver, context, params).map(IntoReply::into_reply).boxed()
		})
	}

	/// Subscription callback. Stored and listed, never reachable through plain calls.
	pub fn subscription<P, F, Fut>(mut self, name: &str, handler: F) -> Self
	where
		P: Params,
		F: Fn(Arc<R>, CallContext, P) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<SubscriptionId, RpcError>> + Send + 'static,
	{
		if let Some(descriptor) = self.descriptor::<P, Result<SubscriptionId, RpcError>, _>(
			name,
			true,
			MethodKind::Subscription,
			move |receiver, context, params| {
				handler(receiver, context, params)
					.map(IntoReply::into_reply)
					.boxed()
			},
		) {
			self.service.subscriptions.push(descriptor);
		}
		self
	}

	pub fn build(self) -> Service {
		self.service
	}

	fn add_callback<P, O, H>(mut self, name: &str, requires_context: bool, invoke: H) -> Self
	where
		P: Params,
		O: IntoReply,
		H: Fn(Arc<R>, CallContext, P) -> Invocation + Send + Sync + 'static,
	{
		if let Some(descriptor) =
			self.descriptor::<P, O, _>(name, requires_context, MethodKind::Callback, invoke)
		{
			self.service.callbacks.push(descriptor);
		}
		self
	}

	fn descriptor<P, O, H>(
		&self,
		name: &str,
		requires_context: bool,
		kind: MethodKind,
		invoke: H,
	) -> Option<MethodDescriptor>
	where
		P: Params,
		O: IntoReply,
		H: Fn(Arc<R>, CallContext, P) -> Invocation + Send + Sync + 'static,
	{
		let Some(exported) = exported_name(name) else {
			debug!(service = %self.service.name, "Skipping unaddressable method {name:?}");
			return None;
		};

		let receiver = self.receiver.clone();
		let service = self.service.name.clone();
		let method = exported.clone();
		let bind: BindFn = Box::new(move |context: CallContext, params: Option<&RawValue>| {
			let params = decode_params::<P>(&service, &method, params)?;
			Ok(invoke(receiver.clone(), context, params))
		});

		Some(MethodDescriptor {
			name: exported,
			params: P::specs(),
			requires_context,
			returns: O::SHAPE,
			kind,
			bind,
		})
	}
}

#[derive(Default)]
struct ServiceEntry {
	version: String,
	callbacks: HashMap<String, Arc<MethodDescriptor>>,
	subscriptions: HashMap<String, Arc<MethodDescriptor>>,
}

/// Listing of one registered service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
	pub name: String,
	pub version: String,
	pub methods: Vec<String>,
	pub subscriptions: Vec<String>,
}

/// One request resolved against the registry.
pub struct BoundCall {
	pub id: Option<RequestId>,
	pub descriptor: Option<Arc<MethodDescriptor>>,
	pub resolution: Result<Invocation, RpcError>,
}

#[derive(Default)]
pub struct ServiceRegistry {
	services: HashMap<String, ServiceEntry>,
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a service. Registering an existing name merges the handlers, later ones win.
	pub fn register(&mut self, service: Service) -> Result<(), RegistryError> {
		if service.name.is_empty() {
			return Err(RegistryError::NoServiceName);
		}
		if !service.public {
			return Err(RegistryError::NotExported);
		}
		if service.callbacks.is_empty() && service.subscriptions.is_empty() {
			return Err(RegistryError::NoSuitable);
		}

		let entry = self.services.entry(service.name.clone()).or_default();
		entry.version = service.version;
		for descriptor in service.callbacks {
			debug!(service = %service.name, method = %descriptor.name, "Registered callback");
			entry.callbacks.insert(descriptor.name.clone(), Arc::new(descriptor));
		}
		for descriptor in service.subscriptions {
			debug!(service = %service.name, method = %descriptor.name, "Registered subscription");
			entry.subscriptions.insert(descriptor.name.clone(), Arc::new(descriptor));
		}
		info!(service = %service.name, version = %entry.version, "Service registered");
		Ok(())
	}

	pub fn register_all(
		&mut self,
		services: impl IntoIterator<Item = Service>,
	) -> Result<(), RegistryError> {
		let services = services.into_iter().collect::<Vec<_>>();
		if services.is_empty() {
			return Err(RegistryError::NoApis);
		}
		services
			.into_iter()
			.try_for_each(|service| self.register(service))
	}

	pub fn resolve(&self, service: &str, method: &str) -> Result<Arc<MethodDescriptor>, RpcError> {
		self.services
			.get(service)
			.and_then(|entry| entry.callbacks.get(method))
			.cloned()
			.ok_or_else(|| RpcError::method_not_found(service, method))
	}

	pub fn resolve_subscription(
		&self,
		service: &str,
		method: &str,
	) -> Result<Arc<MethodDescriptor>, RpcError> {
		self.services
			.get(service)
			.and_then(|entry| entry.subscriptions.get(method))
			.cloned()
			.ok_or_else(|| RpcError::method_not_found(service, method))
	}

	/// Resolves one batch item and decodes its params.
	pub fn bind(&self, incoming: Incoming, context: CallContext) -> BoundCall {
		let request = match incoming {
			Incoming::Call(request) => request,
			Incoming::Invalid { id, error } => {
				return BoundCall {
					id,
					descriptor: None,
					resolution: Err(error),
				}
			},
		};

		let descriptor = if request.is_subscription {
			Err(RpcError::method_not_found(&request.service, &request.method))
		} else {
			self.resolve(&request.service, &request.method)
		};
		let (descriptor, resolution) = match descriptor {
			Ok(descriptor) => {
				let resolution = descriptor.bind(context, request.params.as_deref());
				(Some(descriptor), resolution)
			},
			Err(error) => (None, Err(error)),
		};

		BoundCall {
			id: request.id,
			descriptor,
			resolution,
		}
	}

	pub fn services(&self) -> Vec<ServiceInfo> {
		let sorted = |map: &HashMap<String, Arc<MethodDescriptor>>| {
			let mut names = map.keys().cloned().collect::<Vec<_>>();
			names.sort();
			names
		};
		let mut services = self
			.services
			.iter()
			.map(|(name, entry)| ServiceInfo {
				name: name.clone(),
				version: entry.version.clone(),
				methods: sorted(&entry.callbacks),
				subscriptions: sorted(&entry.subscriptions),
			})
			.collect::<Vec<_>>();
		services.sort_by(|a, b| a.name.cmp(&b.name));
		services
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::parse_message;
	use serde_json::{json, Value};
	use test_case::test_case;

	struct Calculator;

	impl Calculator {
		fn add(&self, a: u64, b: u64) -> Result<u64, RpcError> {
			a.checked_add(b)
				.ok_or_else(|| RpcError::invalid_params("overflow"))
		}
	}

	fn calculator() -> Service {
		Service::builder("calc", Arc::new(Calculator))
			.method("Add", |calc: Arc<Calculator>, (a, b): (u64, u64)| async move {
				calc.add(a, b)
			})
			.method("ping", |_, ()| async {})
			.method_with_context("cancelled", |_, context: CallContext, ()| async move {
				context.is_cancelled()
			})
			.subscription("NewHeads", |_, _, ()| async {
				Ok(SubscriptionId("0x1".to_string()))
			})
			.build()
	}

	fn registry() -> ServiceRegistry {
		let mut registry = ServiceRegistry::new();
		registry.register(calculator()).unwrap();
		registry
	}

	async fn call(registry: &ServiceRegistry, message: &str) -> Result<Reply, RpcError> {
		let mut batch = parse_message(message.as_bytes())?;
		let call = registry.bind(batch.items.remove(0), CallContext::default());
		Ok(call.resolution?.await)
	}

	#[test_case("Add" => Some("add".to_string()))]
	#[test_case("add" => Some("add".to_string()))]
	#[test_case("ÉCHO" => Some("éCHO".to_string()))]
	#[test_case("" => None)]
	#[test_case("send_raw" => None)]
	fn exported_names(name: &str) -> Option<String> {
		exported_name(name)
	}

	#[test]
	fn descriptors_describe_handlers() {
		let registry = registry();
		let add = registry.resolve("calc", "add").unwrap();
		assert_eq!(add.params.len(), 2);
		assert!(!add.requires_context);
		assert_eq!(add.returns, ReturnShape::ValueOrError);
		assert_eq!(add.kind, MethodKind::Callback);

		let ping = registry.resolve("calc", "ping").unwrap();
		assert_eq!(ping.returns, ReturnShape::Nothing);

		let cancelled = registry.resolve("calc", "cancelled").unwrap();
		assert!(cancelled.requires_context);
		assert_eq!(cancelled.returns, ReturnShape::Value);

		let heads = registry.resolve_subscription("calc", "newHeads").unwrap();
		assert_eq!(heads.kind, MethodKind::Subscription);
	}

	#[tokio::test]
	async fn invokes_resolved_method() {
		let registry = registry();
		let reply = call(&registry, r#"{"method":"calc_add","id":1,"params":[2,3]}"#).await;
		assert_eq!(reply, Ok(Reply::Value(json!(5))));

		let reply = call(&registry, r#"{"method":"calc_ping","id":1}"#).await;
		assert_eq!(reply, Ok(Reply::Value(Value::Null)));
	}

	#[tokio::test]
	async fn handler_error_is_reply() {
		let registry = registry();
		let message = format!(r#"{{"method":"calc_add","params":[{},1]}}"#, u64::MAX);
		let reply = call(&registry, &message).await.unwrap();
		assert_eq!(reply, Reply::error(RpcError::invalid_params("overflow")));
	}

	#[test_case(r#"{"method":"calc_sub","id":1}"#, -32601 ; "unknown method")]
	#[test_case(r#"{"method":"unknownsvc_foo","id":2}"#, -32601 ; "unknown service")]
	#[test_case(r#"{"method":"calc_newHeads","id":3}"#, -32601 ; "subscription is not callable")]
	#[test_case(r#"{"method":"calc_add","id":4,"params":[1]}"#, -32602 ; "missing argument")]
	#[test_case(r#"{"method":"calc_add","id":5,"params":[1,2,3]}"#, -32602 ; "too many arguments")]
	#[test_case(r#"{"method":"calc_add","id":6}"#, -32602 ; "no params")]
	#[tokio::test]
	async fn resolution_failures(message: &str, code: i32) {
		let registry = registry();
		let error = call(&registry, message).await.unwrap_err();
		assert_eq!(error.code, code);
	}

	#[test]
	fn subscription_flag_is_method_not_found() {
		let registry = registry();
		let mut batch = parse_message(br#"{"method":"calc_add","params":[1,2]}"#).unwrap();
		let Incoming::Call(mut request) = batch.items.remove(0) else {
			panic!("Expected a call");
		};
		request.is_subscription = true;
		let call = registry.bind(Incoming::Call(request), CallContext::default());
		assert!(call.descriptor.is_none());
		assert_eq!(call.resolution.err().map(|error| error.code), Some(-32601));
	}

	#[tokio::test]
	async fn context_is_passed_through() {
		let registry = registry();
		let token = CancellationToken::new();
		token.cancel();
		let mut batch = parse_message(br#"{"method":"calc_cancelled"}"#).unwrap();
		let call = registry.bind(batch.items.remove(0), CallContext::new(token));
		assert_eq!(call.resolution.unwrap().await, Reply::Value(json!(true)));
	}

	#[test]
	fn registration_errors() {
		let mut registry = ServiceRegistry::new();
		assert_eq!(registry.register_all(Vec::new()), Err(RegistryError::NoApis));

		let unnamed = Service::builder("", Arc::new(Calculator))
			.method("ping", |_, ()| async {})
			.build();
		assert_eq!(registry.register(unnamed), Err(RegistryError::NoServiceName));

		let private = Service::builder("calc", Arc::new(Calculator))
			.private()
			.method("ping", |_, ()| async {})
			.build();
		assert_eq!(registry.register(private), Err(RegistryError::NotExported));

		let empty = Service::builder("calc", Arc::new(Calculator))
			.method("bad_name", |_, ()| async {})
			.build();
		assert_eq!(registry.register(empty), Err(RegistryError::NoSuitable));
	}

	#[tokio::test]
	async fn re_registration_merges_and_replaces() {
		let mut registry = registry();
		let other = Service::builder("calc", Arc::new(Calculator))
			.version("2.0")
			.method("add", |_, (_a, _b): (u64, u64)| async { 42u64 })
			.method("version", |_, ()| async { "2.0".to_string() })
			.build();
		registry.register(other).unwrap();

		let services = registry.services();
		assert_eq!(services.len(), 1);
		assert_eq!(services[0].version, "2.0");
		assert_eq!(
			services[0].methods,
			vec!["add", "cancelled", "ping", "version"]
		);
		assert_eq!(services[0].subscriptions, vec!["newHeads"]);

		let reply = call(&registry, r#"{"method":"calc_add","params":[1,1]}"#).await;
		assert_eq!(reply, Ok(Reply::Value(json!(42))));
	}
}
