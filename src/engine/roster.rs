//! Fixed display order for the participant roster.
//!
//! The board keeps every participant in a fixed visual slot. Slots are
//! assigned by display name from the configured order; anyone whose name
//! is not listed (e.g. after a rename) goes after all listed names.

use crate::types::Participant;

/// Return `participants` sorted into the configured display order.
///
/// The sort is stable: unlisted participants keep their relative input
/// order, and an empty `display_order` leaves the input untouched.
pub fn order_roster(participants: &[Participant], display_order: &[String]) -> Vec<Participant> {
    let mut ordered = participants.to_vec();
    if display_order.is_empty() {
        return ordered;
    }

    ordered.sort_by_key(|p| {
        display_order
            .iter()
            .position(|name| *name == p.display_name)
            .unwrap_or(usize::MAX)
    });
    ordered
}
