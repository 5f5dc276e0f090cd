use uuid::Uuid;

/// Fresh identifier for a user turn or an unknown parent turn.
///
/// The backend treats these as opaque 8-4-4-4-12 hex strings; a v4 UUID fits that shape.
pub fn new_turn_id() -> String {
    Uuid::new_v4().to_string()
}
