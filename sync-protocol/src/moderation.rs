//! Moderation-view helpers (§4.D): listing pending change requests with the
//! noise filter applied, so timestamp-only churn on an already-owned row
//! never shows up as something to review.

use sync_model::row::DbRow;
use sync_model::sync::ChangeRequest;

/// Whether `request` should be hidden from the moderation queue because it
/// only differs from its `before` state in noise-filtered fields (§9). A
/// request with no `before` (a brand-new row) is never suppressed — there is
/// nothing to compare against.
pub fn is_noise(request: &ChangeRequest) -> bool {
    let Some(before_json) = &request.before_json else {
        return false;
    };
    let (Ok(before), Ok(after)) = (
        serde_json::from_str::<serde_json::Value>(before_json),
        serde_json::from_str::<serde_json::Value>(&request.after_json),
    ) else {
        return false;
    };
    let before = DbRow(before.as_object().cloned().unwrap_or_default());
    let after = DbRow(after.as_object().cloned().unwrap_or_default());
    sync_store::suppress_noise(&request.table_name, &before, &after)
}

/// Filter a list of change requests down to the ones worth a moderator's
/// attention.
pub fn filter_change_requests_noise(requests: Vec<ChangeRequest>) -> Vec<ChangeRequest> {
    requests.into_iter().filter(|r| !is_noise(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_model::sync::ChangeRequestStatus;

    fn cr(before_json: Option<&str>, after_json: &str) -> ChangeRequest {
        ChangeRequest {
            id: "cr-1".into(),
            table_name: "entity_types".into(),
            row_id: "et-1".into(),
            before_json: before_json.map(String::from),
            after_json: after_json.into(),
            change_author_id: "u-bob".into(),
            change_author_username: "bob".into(),
            record_owner_id: "u-alice".into(),
            record_owner_username: "alice".into(),
            status: ChangeRequestStatus::Pending,
            decided_at: None,
            decided_by: None,
            note: None,
            created_at: 1,
        }
    }

    #[test]
    fn brand_new_row_is_never_noise() {
        let request = cr(None, r#"{"code":"engine","name":"Engine","deleted_at":null,"updated_at":1}"#);
        assert!(!is_noise(&request));
    }

    #[test]
    fn timestamp_only_change_is_noise() {
        let before = r#"{"code":"engine","name":"Engine","deleted_at":null,"updated_at":1}"#;
        let after = r#"{"code":"engine","name":"Engine","deleted_at":null,"updated_at":2}"#;
        let request = cr(Some(before), after);
        assert!(is_noise(&request));
    }

    #[test]
    fn a_real_field_change_is_not_noise() {
        let before = r#"{"code":"engine","name":"Engine","deleted_at":null,"updated_at":1}"#;
        let after = r#"{"code":"engine","name":"Engine V2","deleted_at":null,"updated_at":2}"#;
        let request = cr(Some(before), after);
        assert!(!is_noise(&request));
    }
}
