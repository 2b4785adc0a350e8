use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use super::DelayToken;

/// Future that keeps the shutdown from completing until it resolves or is dropped.
#[must_use = "futures stay idle unless you await them"]
pub struct WithDelay<T: Clone, F> {
	delay_token: Option<DelayToken<T>>,
	future: Pin<Box<F>>,
}

impl<T: Clone, F: Future> WithDelay<T, F> {
	pub(super) fn new(delay_token: DelayToken<T>, future: F) -> Self {
		Self {
			delay_token: Some(delay_token),
			future: Box::pin(future),
		}
	}
}

impl<T: Clone, F: Future> Future for WithDelay<T, F> {
	type Output = F::Output;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let poll = this.future.as_mut().poll(cx);
		if poll.is_ready() {
			this.delay_token.take();
		}
		poll
	}
}
