//! Response body that reports when delivery is over.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::resource::{FinishHooks, FinishReason};

pin_project! {
    /// Wraps a response body and runs the request's finish hooks once the
    /// body has been streamed to the end, failed, or been dropped.
    ///
    /// A body dropped after its last frame counts as completed; hyper stops
    /// polling as soon as `is_end_stream` reports true.
    pub struct FinishBody<B>
    where
        B: HttpBody,
    {
        #[pin]
        inner: B,
        hooks: Option<FinishHooks>,
    }

    impl<B> PinnedDrop for FinishBody<B>
    where
        B: HttpBody,
    {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(hooks) = this.hooks.take() {
                let reason = if this.inner.is_end_stream() {
                    FinishReason::Completed
                } else {
                    FinishReason::Abandoned
                };
                hooks.run(reason);
            }
        }
    }
}

impl<B> FinishBody<B>
where
    B: HttpBody,
{
    /// Attach `hooks` to `inner`.
    pub fn new(inner: B, hooks: FinishHooks) -> Self {
        Self {
            inner,
            hooks: Some(hooks),
        }
    }
}

impl<B> HttpBody for FinishBody<B>
where
    B: HttpBody,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let frame = ready!(this.inner.as_mut().poll_frame(cx));

        let reason = match &frame {
            None => Some(FinishReason::Completed),
            Some(Err(_)) => Some(FinishReason::Errored),
            Some(Ok(_)) if this.inner.is_end_stream() => Some(FinishReason::Completed),
            Some(Ok(_)) => None,
        };
        // Hooks stay attached until the stream ends or fails.
        if let Some(reason) = reason {
            if let Some(hooks) = this.hooks.take() {
                hooks.run(reason);
            }
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
