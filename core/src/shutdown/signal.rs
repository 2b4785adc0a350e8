use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use super::{lock, with_cancel::WithCancel, Shared};

/// Resolves with the shutdown reason once the shutdown is triggered.
#[must_use = "futures stay idle unless you await them"]
pub struct Signal<T: Clone> {
	pub(super) inner: Shared<T>,
}

impl<T: Clone> Clone for Signal<T> {
	fn clone(&self) -> Self {
		Signal {
			inner: self.inner.clone(),
		}
	}
}

impl<T: Clone> Signal<T> {
	/// Races `future` against this signal.
	///
	/// Yields `Ok(value)` if the future finishes first and `Err(reason)` otherwise.
	pub fn with_cancel<F: Future>(&self, future: F) -> WithCancel<T, F> {
		WithCancel::new(self.clone(), future)
	}
}

impl<T: Clone> Future for Signal<T> {
	type Output = T;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let mut inner = lock(&self.inner);
		if let Some(reason) = &inner.reason {
			return Poll::Ready(reason.clone());
		}
		inner.on_trigger.retain(|waker| !waker.will_wake(cx.waker()));
		inner.on_trigger.push(cx.waker().clone());
		Poll::Pending
	}
}
