//! Splits application messages into BLE characteristic-sized frames and reassembles
//! them on the other side.
//!
//! Frame layout: the first byte of every frame is a continuation flag — `0x01` means
//! "more to come", `0x00` means "this is the last fragment". A single `0x02` byte is
//! the session-termination message and is never fragmented.

const MORE: u8 = 0x01;
const LAST: u8 = 0x00;
const TERMINATE: u8 = 0x02;

/// Default cap on a reassembled message's size: 512 KiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, uniffi::Error)]
pub enum FrameError {
    #[error("frame shorter than 1 byte")]
    MalformedFrame,
    #[error("reassembly buffer exceeded the {limit}-byte limit")]
    OversizeMessage { limit: usize },
}

/// The result of feeding one frame to [`Fragmenter::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// More fragments are expected before the message is complete.
    Pending,
    /// The message is complete; here are its bytes.
    Message(Vec<u8>),
    /// The peer sent the single-byte session-termination frame.
    Terminate,
}

/// Splits outgoing messages into frames and reassembles incoming ones, for a single
/// direction of a single characteristic. A `Fragmenter` is not `Sync` by itself — each
/// transport endpoint owns one instance per direction and serializes access to it.
pub struct Fragmenter {
    max_fragment_payload: usize,
    max_message_bytes: usize,
    buffer: Vec<u8>,
}

impl Fragmenter {
    /// `mtu` is the negotiated characteristic MTU; the usable payload per fragment is
    /// `mtu - 1` to leave room for the continuation byte.
    pub fn new(mtu: usize, max_message_bytes: usize) -> Self {
        Self {
            max_fragment_payload: mtu.saturating_sub(1).max(1),
            max_message_bytes,
            buffer: Vec::new(),
        }
    }

    pub fn with_default_limit(mtu: usize) -> Self {
        Self::new(mtu, DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Splits `message` into frames, each prefixed with a continuation byte. The final
    /// frame is prefixed `0x00`; every other frame is prefixed `0x01`. An empty message
    /// still produces exactly one (empty-payload) last frame.
    pub fn frame(&self, message: &[u8]) -> Vec<Vec<u8>> {
        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![&[][..]]
        } else {
            message.chunks(self.max_fragment_payload).collect()
        };
        let last_index = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let flag = if i == last_index { LAST } else { MORE };
                let mut frame = Vec::with_capacity(chunk.len() + 1);
                frame.push(flag);
                frame.extend_from_slice(chunk);
                frame
            })
            .collect()
    }

    /// Builds the single-byte session-termination frame. Never fragmented.
    pub fn terminate_frame() -> Vec<u8> {
        vec![TERMINATE]
    }

    /// Feeds one received frame into the reassembly buffer.
    pub fn accept(&mut self, frame: &[u8]) -> Result<Accepted, FrameError> {
        let Some((&flag, payload)) = frame.split_first() else {
            return Err(FrameError::MalformedFrame);
        };
        if flag == TERMINATE && frame.len() == 1 {
            return Ok(Accepted::Terminate);
        }
        if self.buffer.len() + payload.len() > self.max_message_bytes {
            self.buffer.clear();
            return Err(FrameError::OversizeMessage {
                limit: self.max_message_bytes,
            });
        }
        self.buffer.extend_from_slice(payload);
        match flag {
            MORE => Ok(Accepted::Pending),
            LAST => Ok(Accepted::Message(std::mem::take(&mut self.buffer))),
            _ => Err(FrameError::MalformedFrame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut fragmenter = Fragmenter::new(1024, DEFAULT_MAX_MESSAGE_BYTES);
        let mut out = None;
        for frame in frames {
            match fragmenter.accept(frame).unwrap() {
                Accepted::Message(m) => {
                    assert!(out.is_none(), "message completed twice");
                    out = Some(m);
                }
                Accepted::Pending => {}
                Accepted::Terminate => panic!("unexpected terminate"),
            }
        }
        out.expect("message never completed")
    }

    #[rstest::rstest]
    #[case(2)]
    #[case(23)]
    #[case(517)]
    #[case(4096)]
    fn round_trips_for_any_mtu(#[case] mtu: usize) {
        let message = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let fragmenter = Fragmenter::new(mtu, DEFAULT_MAX_MESSAGE_BYTES);
        let frames = fragmenter.frame(&message);
        assert_eq!(reassemble(&frames), message);
    }

    #[test]
    fn mtu_23_fragments_1024_bytes_into_47_frames() {
        let message = vec![0xAAu8; 1024];
        let fragmenter = Fragmenter::new(23, DEFAULT_MAX_MESSAGE_BYTES);
        let frames = fragmenter.frame(&message);
        assert_eq!(frames.len(), 47);
        for frame in &frames[..frames.len() - 1] {
            assert_eq!(frame[0], MORE);
            assert_eq!(frame.len(), 23);
        }
        let last = frames.last().unwrap();
        assert_eq!(last[0], LAST);
        assert_eq!(reassemble(&frames), message);
    }

    #[test]
    fn single_byte_message_round_trips() {
        let fragmenter = Fragmenter::new(23, DEFAULT_MAX_MESSAGE_BYTES);
        let frames = fragmenter.frame(&[0x42]);
        assert_eq!(frames.len(), 1);
        assert_eq!(reassemble(&frames), vec![0x42]);
    }

    #[test]
    fn message_at_exactly_the_limit_is_accepted() {
        let limit = 64;
        let message = vec![1u8; limit];
        let fragmenter = Fragmenter::new(16, limit);
        let frames = fragmenter.frame(&message);
        let mut reassembler = Fragmenter::new(16, limit);
        let mut result = None;
        for frame in &frames {
            if let Accepted::Message(m) = reassembler.accept(frame).unwrap() {
                result = Some(m);
            }
        }
        assert_eq!(result.unwrap(), message);
    }

    #[test]
    fn message_over_the_limit_is_rejected() {
        let limit = 64;
        let message = vec![1u8; limit + 1];
        let fragmenter = Fragmenter::new(16, limit);
        let frames = fragmenter.frame(&message);
        let mut reassembler = Fragmenter::new(16, limit);
        let mut saw_oversize = false;
        for frame in &frames {
            match reassembler.accept(frame) {
                Err(FrameError::OversizeMessage { limit: l }) => {
                    assert_eq!(l, limit);
                    saw_oversize = true;
                    break;
                }
                Ok(_) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(saw_oversize);
    }

    #[test]
    fn empty_frame_is_malformed() {
        let mut fragmenter = Fragmenter::new(23, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(fragmenter.accept(&[]), Err(FrameError::MalformedFrame));
    }

    #[test]
    fn terminate_frame_is_recognized() {
        let mut fragmenter = Fragmenter::new(23, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(
            fragmenter.accept(&Fragmenter::terminate_frame()),
            Ok(Accepted::Terminate)
        );
    }

    #[test]
    fn leading_terminate_byte_with_trailing_payload_is_not_a_terminate() {
        // 0x02 is only a terminate signal when it is the *entire* one-byte frame;
        // otherwise it is just an (invalid) continuation flag.
        let mut fragmenter = Fragmenter::new(23, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(
            fragmenter.accept(&[0x02, 0x01]),
            Err(FrameError::MalformedFrame)
        );
    }
}
