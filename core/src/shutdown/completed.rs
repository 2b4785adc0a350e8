use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use super::{lock, Shared};

/// Resolves with the shutdown reason once the shutdown is triggered and no delay token is left.
#[must_use = "futures stay idle unless you await them"]
pub struct Completed<T: Clone> {
	pub(super) inner: Shared<T>,
}

impl<T: Clone> Clone for Completed<T> {
	fn clone(&self) -> Self {
		Completed {
			inner: self.inner.clone(),
		}
	}
}

impl<T: Clone> Future for Completed<T> {
	type Output = T;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let mut inner = lock(&self.inner);
		if let (0, Some(reason)) = (inner.delay_tokens, &inner.reason) {
			return Poll::Ready(reason.clone());
		}
		inner.on_complete.retain(|waker| !waker.will_wake(cx.waker()));
		inner.on_complete.push(cx.waker().clone());
		Poll::Pending
	}
}
