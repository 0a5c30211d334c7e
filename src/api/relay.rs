use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use tracing::{info, warn};

use crate::sse::{self, StreamEvent};
use crate::upstream::{DeltaStream, UpstreamError};

/// Re-frames upstream deltas as SSE records and appends `[DONE]`.
///
/// An upstream failure is yielded as the last item, which makes the response
/// body abort without the sentinel.
pub fn sse_records(
    deltas: DeltaStream,
    request_id: String,
) -> impl Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static {
    stream::unfold(Some((deltas, request_id, 0usize)), |state| async move {
        let Some((mut deltas, request_id, fragments)) = state else {
            return None;
        };
        match deltas.next().await {
            Some(Ok(text)) => {
                let record = sse::encode(&StreamEvent::fragment(text));
                Some((Ok(record), Some((deltas, request_id, fragments + 1))))
            }
            Some(Err(err)) => {
                warn!(
                    request_id = request_id.as_str(),
                    fragments,
                    error = %err,
                    "upstream stream failed, aborting response"
                );
                Some((Err(err), None))
            }
            None => {
                info!(
                    request_id = request_id.as_str(),
                    fragments, "completion stream finished"
                );
                Some((Ok(sse::encode(&StreamEvent::Done)), None))
            }
        }
    })
}
