//! Async I/O engine
//!
//! Submits slot buffers to the transport and reacts to their completions.
//! Every function here runs with the session lock held: callers pass the
//! locked [`SessionInner`], and completions take the lock themselves. The
//! transport contract guarantees completions never run inside `submit`, so
//! resubmitting from a completion under the lock is safe.

use super::{SessionInner, SessionState, Shared, command};
use common::{Completion, CompletionFn, Transfer, TransferStatus};
use protocol::{
    BUFFER_SIZE, Command, Direction, READ_TRANSFER_LENGTH, TransferError, WRITE_TRANSFER_LENGTH,
    encode_command,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Encode `command` into the write slot and submit it
pub(super) fn submit_write(
    shared: &Arc<Shared>,
    inner: &mut SessionInner,
    command: Command,
) -> Result<(), TransferError> {
    let mut buffer = inner.write_slot.lend()?;
    encode_command(command, &mut buffer);

    let transfer = Transfer {
        direction: Direction::Write,
        buffer,
        length: WRITE_TRANSFER_LENGTH,
        on_complete: completion_for(shared, Direction::Write),
    };

    match shared.transport.submit(transfer) {
        Ok(()) => {
            inner.stats.writes_submitted += 1;
            Ok(())
        }
        Err(rejected) => {
            inner.write_slot.restore(rejected.buffer);
            warn!(
                "Session {}: write of {} rejected: {}",
                shared.id, command, rejected.error
            );
            Err(rejected.error)
        }
    }
}

/// Submit the read slot with a cleared, full-size buffer
pub(super) fn submit_read(
    shared: &Arc<Shared>,
    inner: &mut SessionInner,
) -> Result<(), TransferError> {
    let mut buffer = inner.read_slot.lend()?;
    buffer.fill(0);

    let transfer = Transfer {
        direction: Direction::Read,
        buffer,
        length: READ_TRANSFER_LENGTH,
        on_complete: completion_for(shared, Direction::Read),
    };

    shared.transport.submit(transfer).map_err(|rejected| {
        inner.read_slot.restore(rejected.buffer);
        rejected.error
    })
}

/// Completion callback routed back to the session, if it still exists
fn completion_for(shared: &Arc<Shared>, direction: Direction) -> CompletionFn {
    let session = Arc::downgrade(shared);
    Box::new(move |completion| {
        let Some(shared) = session.upgrade() else {
            return;
        };
        match direction {
            Direction::Write => on_write_complete(&shared, completion),
            Direction::Read => on_read_complete(&shared, completion),
        }
    })
}

/// Write completion: free the slot
///
/// Failures are recorded but not reported to the caller; replies on the read
/// channel are what establish that a command took effect.
pub(super) fn on_write_complete(shared: &Shared, completion: Completion) {
    let mut inner = shared.lock();
    inner.write_slot.restore(completion.buffer);

    if completion.status == TransferStatus::Removed && inner.state == SessionState::Active {
        inner.mark_detached();
        info!("Session {}: device removed during write", shared.id);
    }

    if !completion.status.is_success() {
        warn!(
            "Session {}: write completed with {:?} ({} bytes)",
            shared.id, completion.status, completion.actual_length
        );
        inner.stats.write_failures += 1;
        inner.stats.last_write_failure = Some(completion.status);
    }

    drop(inner);
    shared.notify();
}

/// Read completion: inspect the payload, then keep the channel outstanding
///
/// `Removed` is the transport's own detach signal: an active session moves to
/// `Detached` even when no hot-plug event ever reaches the lifecycle manager.
pub(super) fn on_read_complete(shared: &Arc<Shared>, completion: Completion) {
    let Completion {
        status,
        buffer,
        actual_length,
    } = completion;

    let mut inner = shared.lock();
    inner.read_slot.restore(buffer);

    match status {
        TransferStatus::Cancelled | TransferStatus::Removed => {
            debug!("Session {}: read channel stopped ({:?})", shared.id, status);
            if status == TransferStatus::Removed
                && inner.state == SessionState::Active
                && inner.mark_detached()
            {
                info!("Session {}: device removed", shared.id);
            }
            drop(inner);
            shared.notify();
            return;
        }
        TransferStatus::Failed(error) => {
            debug!("Session {}: read failed: {}", shared.id, error);
        }
        TransferStatus::Completed => {
            inner.stats.reads_completed += 1;
            if actual_length > 0 {
                let SessionInner {
                    read_slot,
                    pending,
                    stats,
                    ..
                } = &mut *inner;
                if let Some(payload) = read_slot.contents() {
                    let payload = &payload[..actual_length.min(BUFFER_SIZE)];
                    trace!(
                        "Session {}: received {:02x?}",
                        shared.id,
                        &payload[..5.min(payload.len())]
                    );
                    if command::inspect_response(payload, pending) {
                        stats.responses_matched += 1;
                    }
                }
            }
        }
    }

    if inner.state == SessionState::Active
        && let Err(e) = submit_read(shared, &mut inner)
    {
        warn!("Session {}: failed to resubmit read: {}", shared.id, e);
    }

    drop(inner);
    shared.notify();
}
