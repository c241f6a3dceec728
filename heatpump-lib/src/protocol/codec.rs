use super::{Frame, FrameClass};

/// Turns a validated frame into named values. The engine calls it once
/// per frame and never looks at payload semantics itself.
pub trait Decoder: Send {
    fn decode(&mut self, class: FrameClass, frame: &Frame) -> Vec<(String, String)>;
}

/// Builds the bytes of a named command, checksum excluded.
pub trait CommandEncoder: Send {
    fn encode(&self, name: &str, value: &str) -> Option<Vec<u8>>;
}
