//! Process wide shutdown coordination.
//!
//! A [`Controller`] is triggered exactly once with a reason. Everything interested in the
//! shutdown either awaits the trigger ([`Signal`]), gets cancelled by it ([`WithCancel`]), or
//! holds a [`DelayToken`] that keeps the shutdown from completing until the holder is done.

use std::{
	fmt,
	future::Future,
	mem,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
	task::Waker,
};

pub use self::{
	completed::Completed, signal::Signal, with_cancel::WithCancel, with_delay::WithDelay,
};

mod completed;
mod signal;
mod utils;
mod with_cancel;
mod with_delay;

pub use utils::user_signal;

type Shared<T> = Arc<Mutex<ControllerInner<T>>>;

fn lock<T>(inner: &Mutex<ControllerInner<T>>) -> MutexGuard<'_, ControllerInner<T>> {
	inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable, thread safe shutdown handle.
///
/// Note that dropping a `JoinHandle` detaches its task. Wrap futures before spawning them if
/// they have to be cancelled or waited for.
#[derive(Clone)]
pub struct Controller<T: Clone> {
	inner: Shared<T>,
}

impl<T: Clone> Controller<T> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Mutex::new(ControllerInner::new())),
		}
	}

	pub fn is_shutdown_triggered(&self) -> bool {
		lock(&self.inner).reason.is_some()
	}

	/// Triggered, and no delay token is left.
	pub fn is_shutdown_completed(&self) -> bool {
		let inner = lock(&self.inner);
		inner.reason.is_some() && inner.delay_tokens == 0
	}

	pub fn shutdown_reason(&self) -> Option<T> {
		lock(&self.inner).reason.clone()
	}

	/// Starts the shutdown. Only the first reason is kept, later calls return an error.
	pub fn trigger_shutdown(&self, reason: T) -> Result<(), ShutdownHasStarted<T>> {
		lock(&self.inner).trigger(reason)
	}

	/// Resolves with the reason once the shutdown is triggered and every delay token is gone.
	pub fn completed_shutdown(&self) -> Completed<T> {
		Completed {
			inner: self.inner.clone(),
		}
	}

	/// Resolves with the reason once the shutdown is triggered.
	pub fn triggered_shutdown(&self) -> Signal<T> {
		Signal {
			inner: self.inner.clone(),
		}
	}

	/// Runs `future` until it completes or the shutdown is triggered, whichever happens first.
	pub fn with_cancel<F: Future>(&self, future: F) -> WithCancel<T, F> {
		self.triggered_shutdown().with_cancel(future)
	}

	/// Keeps the shutdown from completing until `future` completes or is dropped.
	pub fn with_delay<F: Future>(
		&self,
		future: F,
	) -> Result<WithDelay<T, F>, ShutdownHasCompleted<T>> {
		Ok(self.delay_token()?.with_future(future))
	}

	/// Token that holds back shutdown completion for as long as it (or any clone) lives.
	///
	/// Fails once the shutdown has completed.
	pub fn delay_token(&self) -> Result<DelayToken<T>, ShutdownHasCompleted<T>> {
		let mut inner = lock(&self.inner);
		if let (0, Some(reason)) = (inner.delay_tokens, &inner.reason) {
			return Err(ShutdownHasCompleted {
				reason: reason.clone(),
			});
		}
		inner.delay_tokens += 1;
		Ok(DelayToken {
			inner: self.inner.clone(),
		})
	}

	/// Waits for Ctrl-C or SIGTERM, then triggers the shutdown with `reason`.
	///
	/// The returned future owns a clone of the controller, so it can be spawned.
	pub fn on_user_signal(&self, reason: T) -> impl Future<Output = ()> + Send + 'static
	where
		T: Send + 'static,
	{
		let controller = self.clone();
		async move {
			user_signal().await;
			// Shutdown may have been triggered elsewhere in the meantime
			let _ = controller.trigger_shutdown(reason);
		}
	}
}

impl<T: Clone> Default for Controller<T> {
	fn default() -> Self {
		Self::new()
	}
}

pub struct ControllerInner<T> {
	reason: Option<T>,
	delay_tokens: usize,
	/// Woken when the shutdown is triggered.
	on_trigger: Vec<Waker>,
	/// Woken when the shutdown completes.
	on_complete: Vec<Waker>,
}

impl<T: Clone> ControllerInner<T> {
	fn new() -> Self {
		Self {
			reason: None,
			delay_tokens: 0,
			on_trigger: Vec::new(),
			on_complete: Vec::new(),
		}
	}

	fn trigger(&mut self, reason: T) -> Result<(), ShutdownHasStarted<T>> {
		if let Some(original) = &self.reason {
			return Err(ShutdownHasStarted {
				reason: original.clone(),
				ignored: reason,
			});
		}
		self.reason = Some(reason);
		mem::take(&mut self.on_trigger)
			.into_iter()
			.for_each(Waker::wake);
		if self.delay_tokens == 0 {
			self.wake_completed();
		}
		Ok(())
	}

	fn release_delay_token(&mut self) {
		self.delay_tokens = self.delay_tokens.saturating_sub(1);
		if self.delay_tokens == 0 && self.reason.is_some() {
			self.wake_completed();
		}
	}

	fn wake_completed(&mut self) {
		mem::take(&mut self.on_complete)
			.into_iter()
			.for_each(Waker::wake);
	}
}

/// Holds back shutdown completion while it exists. Every clone counts separately.
pub struct DelayToken<T: Clone> {
	inner: Shared<T>,
}

impl<T: Clone> DelayToken<T> {
	/// Moves the token into a future, releasing it when the future completes or is dropped.
	pub fn with_future<F: Future>(self, future: F) -> WithDelay<T, F> {
		WithDelay::new(self, future)
	}
}

impl<T: Clone> Clone for DelayToken<T> {
	fn clone(&self) -> Self {
		lock(&self.inner).delay_tokens += 1;
		DelayToken {
			inner: self.inner.clone(),
		}
	}
}

impl<T: Clone> Drop for DelayToken<T> {
	fn drop(&mut self) {
		lock(&self.inner).release_delay_token();
	}
}

/// Returned when a shutdown is triggered a second time.
#[derive(Debug, Clone)]
pub struct ShutdownHasStarted<T> {
	/// Reason of the shutdown already in progress.
	pub reason: T,
	pub ignored: T,
}

impl<T: fmt::Debug> std::error::Error for ShutdownHasStarted<T> {}

impl<T> fmt::Display for ShutdownHasStarted<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("shutdown has already been triggered")
	}
}

/// Returned when a delay is requested after the shutdown completed.
#[derive(Debug, Clone)]
pub struct ShutdownHasCompleted<T> {
	pub reason: T,
}

impl<T: fmt::Debug> std::error::Error for ShutdownHasCompleted<T> {}

impl<T> fmt::Display for ShutdownHasCompleted<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("shutdown has completed, it can not be delayed any more")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{future, time::Duration};
	use tokio::{
		runtime,
		time::{sleep, timeout},
	};

	// Every test gets a fresh runtime and a hard timeout, so a missed wake fails instead of hanging
	#[track_caller]
	fn test_runtime(test: impl Future<Output = ()>) {
		let runtime = runtime::Runtime::new().unwrap();
		runtime.block_on(async move {
			assert!(timeout(Duration::from_millis(100), test).await.is_ok());
		});
	}

	#[test]
	fn trigger_resolves_signal_and_completion() {
		test_runtime(async {
			let controller = Controller::new();
			controller.trigger_shutdown(7).unwrap();
			assert_eq!(controller.triggered_shutdown().await, 7);
			assert_eq!(controller.completed_shutdown().await, 7);
			assert!(controller.is_shutdown_completed());
		});
	}

	#[test]
	fn trigger_from_another_task() {
		test_runtime(async {
			let controller = Controller::new();
			tokio::spawn({
				let controller = controller.clone();
				async move {
					sleep(Duration::from_millis(10)).await;
					controller.trigger_shutdown("draining").unwrap();
				}
			});

			let waiter = tokio::spawn({
				let controller = controller.clone();
				async move { controller.completed_shutdown().await }
			});
			assert_eq!(waiter.await.unwrap(), "draining");
		});
	}

	#[test]
	fn only_first_reason_is_kept() {
		let controller = Controller::new();
		controller.trigger_shutdown("signal").unwrap();
		let error = controller.trigger_shutdown("panic").unwrap_err();
		assert_eq!(error.reason, "signal");
		assert_eq!(error.ignored, "panic");
		assert_eq!(controller.shutdown_reason(), Some("signal"));
	}

	#[test]
	fn delay_token_holds_completion() {
		test_runtime(async {
			let controller = Controller::new();
			let token = controller.delay_token().unwrap();
			let clone = token.clone();

			controller.trigger_shutdown(1).unwrap();
			controller.triggered_shutdown().await;
			drop(token);
			assert!(!controller.is_shutdown_completed());

			tokio::spawn(async move {
				sleep(Duration::from_millis(10)).await;
				drop(clone);
			});
			controller.completed_shutdown().await;
		});
	}

	#[test]
	fn with_delay_releases_on_completion() {
		test_runtime(async {
			let controller = Controller::new();
			let delayed = controller
				.with_delay(async {
					sleep(Duration::from_millis(10)).await;
					"stopped"
				})
				.unwrap();
			controller.trigger_shutdown(()).unwrap();
			assert!(!controller.is_shutdown_completed());

			let task = tokio::spawn(delayed);
			controller.completed_shutdown().await;
			assert_eq!(task.await.unwrap(), "stopped");
		});
	}

	#[test]
	fn no_delay_after_completion() {
		let controller = Controller::new();
		controller.trigger_shutdown("done").unwrap();

		let error = controller.delay_token().err().unwrap();
		assert_eq!(error.reason, "done");
		let error = controller.with_delay(future::pending::<()>()).err().unwrap();
		assert_eq!(error.reason, "done");
	}

	#[test]
	fn with_cancel_is_cancelled_by_trigger() {
		test_runtime(async {
			let controller = Controller::new();
			let task = tokio::spawn(controller.with_cancel(future::pending::<()>()));
			controller.trigger_shutdown("stop").unwrap();
			assert_eq!(task.await.unwrap(), Err("stop"));
		});
	}

	#[test]
	fn with_cancel_completes_without_trigger() {
		test_runtime(async {
			let controller = Controller::<()>::new();
			let result = controller
				.with_cancel(async {
					sleep(Duration::from_millis(10)).await;
					42
				})
				.await;
			assert_eq!(result, Ok(42));
		});
	}

	#[test]
	fn with_cancel_after_trigger_resolves_at_once() {
		test_runtime(async {
			let controller = Controller::new();
			controller.trigger_shutdown("late").unwrap();
			let signal = controller.triggered_shutdown();
			assert_eq!(signal.with_cancel(future::pending::<()>()).await, Err("late"));
		});
	}

	#[test]
	fn user_signal_watcher_can_be_spawned() {
		test_runtime(async {
			let controller = Controller::<String>::new();
			let watcher = tokio::spawn(controller.on_user_signal("signal".to_string()));
			drop(controller);
			sleep(Duration::from_millis(10)).await;
			assert!(!watcher.is_finished());
			watcher.abort();
		});
	}

	#[test]
	fn with_cancel_is_unpin_for_any_reason() {
		fn assert_unpin<U: Unpin>(_: &U) {}

		let controller = Controller::<std::marker::PhantomPinned>::new();
		assert_unpin(&controller.with_cancel(future::ready(())));
	}
}
