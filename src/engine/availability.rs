use crate::model::*;

use super::fetcher::GroupedBookings;

// ── Conflict test ─────────────────────────────────────────────────

/// A booking conflicts only when it lies entirely inside the window.
///
/// Containment, not overlap: a booking that crosses either edge of the
/// window does not make the room unavailable.
pub fn is_conflict(booking: &Booking, window: &Span) -> bool {
    window.contains_span(&booking.span)
}

/// True if none of `bookings` conflicts with `window`. Stops at the first conflict.
pub fn room_is_free(bookings: &[Booking], window: &Span) -> bool {
    !bookings.iter().any(|b| is_conflict(b, window))
}

/// Rooms from the snapshot with no conflicting booking, one entry per room id,
/// in no particular order.
pub fn select(window: &Span, grouped: &GroupedBookings) -> Vec<Room> {
    grouped
        .by_room
        .values()
        .filter(|rb| room_is_free(&rb.bookings, window))
        .map(|rb| rb.room.clone())
        .collect()
}
