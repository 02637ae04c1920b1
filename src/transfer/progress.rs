/// `round(part / whole * 100)` with halves rounded up, clamped to 100.
/// An empty `whole` counts as fully done.
pub fn percent(part: u128, whole: u128) -> u8 {
    if whole == 0 {
        return 100;
    }
    let part = part.min(whole);
    ((part * 200 + whole) / (whole * 2)) as u8
}

pub fn receiver_progress(ack_bytes: u64, size: u64) -> u8 {
    percent(ack_bytes as u128, size as u128)
}

pub fn aggregate_progress(ack_bytes: impl IntoIterator<Item = u64>, size: u64, receivers: usize) -> u8 {
    let total: u128 = ack_bytes
        .into_iter()
        .map(|bytes| bytes.min(size) as u128)
        .sum();
    percent(total, size as u128 * receivers as u128)
}
