//! Well-known cache keys and ranked-list collections.
//!
//! Counters and timestamps written by the training pipeline are ordinary
//! scalar entries under these names.

/// Scalar namespace for global counters
pub const GLOBAL_META: &str = "global_meta";
pub const NUM_USERS: &str = "num_users";
pub const NUM_ITEMS: &str = "num_items";
pub const NUM_FEEDBACK: &str = "num_feedback";
pub const NUM_VALID_POS_FEEDBACKS: &str = "num_valid_pos_feedbacks";
pub const NUM_VALID_NEG_FEEDBACKS: &str = "num_valid_neg_feedbacks";
/// JSON-encoded evaluation of the latest matching model
pub const MATCHING_MODEL_SCORE: &str = "matching_model_score";
/// JSON-encoded evaluation of the latest ranking model
pub const RANKING_MODEL_SCORE: &str = "ranking_model_score";

/// Per-user timestamps: `last_modify_user_time/<user>`
pub const LAST_MODIFY_USER_TIME: &str = "last_modify_user_time";
/// Per-user timestamps: `last_update_user_recommend_time/<user>`
pub const LAST_UPDATE_USER_RECOMMEND_TIME: &str = "last_update_user_recommend_time";

/// Set of every item category seen so far
pub const ITEM_CATEGORIES: &str = "item_categories";

/// Time series: `positive_feedback_rate/<feedback type>`
pub const POSITIVE_FEEDBACK_RATE: &str = "positive_feedback_rate";

// Ranked-list collections
pub const OFFLINE_RECOMMEND: &str = "offline_recommend";
pub const COLLABORATIVE_RECOMMEND: &str = "collaborative_recommend";
pub const ITEM_BASED_RECOMMEND: &str = "item_based_recommend";
pub const USER_BASED_RECOMMEND: &str = "user_based_recommend";
pub const ITEM_TO_ITEM: &str = "item-to-item";
pub const USER_TO_USER: &str = "user-to-user";
pub const NON_PERSONALIZED: &str = "non-personalized";

// Subsets
pub const NEIGHBORS: &str = "neighbors";
pub const LATEST: &str = "latest";
pub const POPULAR: &str = "popular";

/// Join key segments with `/`.
#[must_use]
pub fn key(parts: &[&str]) -> String {
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_join() {
        assert_eq!(key(&[GLOBAL_META, NUM_USERS]), "global_meta/num_users");
        assert_eq!(key(&[NEIGHBORS, "0"]), "neighbors/0");
        assert_eq!(key(&["single"]), "single");
    }
}
