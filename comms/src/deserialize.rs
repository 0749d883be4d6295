use std::io;

/// Types that can be rebuilt from the body of a single frame.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
