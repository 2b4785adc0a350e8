use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use super::signal::Signal;

/// Future that gives up as soon as the shutdown is triggered.
///
/// The wrapped future is dropped on cancellation.
#[must_use = "futures stay idle unless you await them"]
pub struct WithCancel<T: Clone, F> {
	signal: Signal<T>,
	future: Result<Pin<Box<F>>, T>,
}

impl<T: Clone, F: Future> WithCancel<T, F> {
	pub(super) fn new(signal: Signal<T>, future: F) -> Self {
		Self {
			signal,
			future: Ok(Box::pin(future)),
		}
	}
}

// The reason is never pinned, and the future is boxed
impl<T: Clone, F> Unpin for WithCancel<T, F> {}

impl<T: Clone, F: Future> Future for WithCancel<T, F> {
	type Output = Result<F::Output, T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let future = match &mut this.future {
			Ok(future) => future,
			Err(reason) => return Poll::Ready(Err(reason.clone())),
		};

		if let Poll::Ready(value) = future.as_mut().poll(cx) {
			return Poll::Ready(Ok(value));
		}

		let Poll::Ready(reason) = Pin::new(&mut this.signal).poll(cx) else {
			return Poll::Pending;
		};
		this.future = Err(reason.clone());
		Poll::Ready(Err(reason))
	}
}
