//! Settlement-attribution rule.
//!
//! Ordinary items are "chosen" by whoever settled the previous item's
//! auction: settling auction N-1 is the transaction that mints item N and
//! locks in its random traits. Reward items are minted without an auction
//! of their own, which shifts the attribution window by one or two
//! positions around them.

/// Whether `id` is a periodic reward item (minted without an auction).
///
/// Every tenth item up to and including 1820 is a reward item; item 0 is
/// the genesis item, not a reward item.
pub const fn is_reward_item(id: u64) -> bool {
    id % 10 == 0 && id <= 1820 && id != 0
}

/// The id of the auction whose settlement minted item `n`, i.e. the
/// settlement transaction to credit for item `n`'s appearance.
///
/// Returns `None` for `n <= 1`: the genesis items have no settler.
///
/// - a reward item is minted by the settlement of the auction directly
///   before it (`n - 1`);
/// - the item directly after a reward item is minted by the settlement
///   two positions back (`n - 2`), since the reward item between them
///   had no auction;
/// - every other item is minted by the settlement of `n - 1`.
pub const fn settled_id(n: u64) -> Option<u64> {
    if n <= 1 {
        return None;
    }
    if is_reward_item(n) {
        Some(n - 1)
    } else if is_reward_item(n - 1) {
        Some(n - 2)
    } else {
        Some(n - 1)
    }
}
