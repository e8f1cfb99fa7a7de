use {
    super::id::UserId,
    chrono::{DateTime, Utc},
    serde::Serialize,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GameSelection {
    pub user_id: UserId,
    pub game_id: String,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SelectionResult {
    Added(GameSelection),
    AlreadySelected(GameSelection),
    LimitReached { max_games: u32 },
}
