//! # Skip-when-busy scheduler
//!
//! ## Responsibility
//! Connect a fast input stream to a slow async transform.
//!
//! ## Guarantees
//! - At most one transform call in flight
//! - While busy, only the newest input is remembered; older ones are dropped
//! - When the in-flight call resolves, the remembered input (if any) runs next
//! - When the input ends, a remembered input is flushed before the output ends,
//!   so the last output always corresponds to the last input
//! - An input error is yielded and terminates the output
//!
//! ## NOT Responsible For
//! - Retrying or swallowing transform failures; a fallible transform simply
//!   returns a `Result` as its output value

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};

struct State<S, F, T, Fut> {
    input: Pin<Box<S>>,
    transform: F,
    in_flight: Option<Pin<Box<Fut>>>,
    pending: Option<T>,
    input_done: bool,
    failed: bool,
}

/// Drive `transform` from `input` with a latest-value-wins buffer of depth 1.
///
/// Each output item is the result of one transform call, or the input
/// error that ended the sequence.
pub fn skip_when_busy<S, T, E, F, Fut>(input: S, transform: F) -> impl Stream<Item = Result<Fut::Output, E>>
where
    S: Stream<Item = Result<T, E>>,
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    let state = State {
        input: Box::pin(input),
        transform,
        in_flight: None,
        pending: None,
        input_done: false,
        failed: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.failed {
            return None;
        }
        loop {
            if st.in_flight.is_none() {
                if let Some(value) = st.pending.take() {
                    st.in_flight = Some(Box::pin((st.transform)(value)));
                } else if st.input_done {
                    return None;
                }
            }

            let busy = st.in_flight.is_some();
            tokio::select! {
                biased;

                item = st.input.next(), if !st.input_done => match item {
                    Some(Ok(value)) => {
                        if busy {
                            st.pending = Some(value);
                        } else {
                            st.in_flight = Some(Box::pin((st.transform)(value)));
                        }
                    }
                    Some(Err(e)) => {
                        st.failed = true;
                        st.in_flight = None;
                        st.pending = None;
                        return Some((Err(e), st));
                    }
                    None => st.input_done = true,
                },

                out = poll_in_flight(&mut st.in_flight), if busy => {
                    st.in_flight = None;
                    return Some((Ok(out), st));
                }
            }
        }
    })
}

async fn poll_in_flight<Fut: Future>(slot: &mut Option<Pin<Box<Fut>>>) -> Fut::Output {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// [`skip_when_busy`] for inputs that cannot fail.
pub fn skip_when_busy_infallible<S, T, F, Fut>(input: S, transform: F) -> impl Stream<Item = Fut::Output>
where
    S: Stream<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    skip_when_busy(input.map(Ok::<T, std::convert::Infallible>), transform).map(|item| match item {
        Ok(out) => out,
        Err(never) => match never {},
    })
}
