use crate::domain::UserId;

/// Single-admin authorization: only the configured admin may control the relay.
pub fn is_authorized(user_id: Option<UserId>, admin_id: i64) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    admin_id != 0 && user_id.0 == admin_id
}
