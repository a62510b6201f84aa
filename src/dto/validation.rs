//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dto::game::CreateRoomRequest;

const ROOM_NAME_MAX: usize = 50;

/// Validates that a room name is 1 to 50 characters once trimmed.
pub fn validate_room_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        let mut err = ValidationError::new("room_name_empty");
        err.message = Some("Room name must not be empty".into());
        return Err(err);
    }

    if trimmed.chars().count() > ROOM_NAME_MAX {
        let mut err = ValidationError::new("room_name_length");
        err.message =
            Some(format!("Room name must be at most {ROOM_NAME_MAX} characters").into());
        return Err(err);
    }

    Ok(())
}

/// Cross-field check: the minimum player count cannot exceed the maximum.
pub fn validate_player_bounds(request: &CreateRoomRequest) -> Result<(), ValidationError> {
    if request.min_players > request.max_players {
        let mut err = ValidationError::new("player_bounds");
        err.message = Some("min_players must not exceed max_players".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_name_valid() {
        assert!(validate_room_name("Full Moon").is_ok());
        assert!(validate_room_name("  padded  ").is_ok());
        assert!(validate_room_name(&"x".repeat(50)).is_ok());
    }

    #[test]
    fn test_validate_room_name_invalid() {
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("   ").is_err());
        assert!(validate_room_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn test_player_bounds() {
        let request: CreateRoomRequest =
            serde_json::from_str(r#"{"name":"room","min_players":8,"max_players":6}"#).unwrap();
        assert!(validate_player_bounds(&request).is_err());

        let request: CreateRoomRequest = serde_json::from_str(r#"{"name":"room"}"#).unwrap();
        assert!(validate_player_bounds(&request).is_ok());
        assert_eq!(request.night_duration, 90);
        assert_eq!(request.day_duration, 180);
        assert_eq!(request.vote_duration, 60);
    }
}
