pub fn double(x: u32) -> u32 {
    x * 2
}

#[faults::skip]
pub fn seed_hash(x: u32) -> u32 {
    x * 31 + 7
}

#[cfg_attr(test, faults::skip)]
pub fn with_headroom(x: u32) -> u32 {
    x + 100
}
