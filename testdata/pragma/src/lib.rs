pub fn scale(x: u32) -> u32 {
    let factor = 3; // pragma: no mutate
    x * factor
}
