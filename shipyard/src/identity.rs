use crate::types::Player;

// Resolves who "me" and "opponent" are from the server's player list. Pure and total: any
// input, including an empty list or no session, yields an answer rather than an error.

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PlayerIdentity {
    pub me: Option<Player>,
    pub opponent: Option<Player>,
    pub me_ready_key: Option<String>,
    pub opponent_ready_key: Option<String>,
}

impl PlayerIdentity {
    pub fn is_seated(&self) -> bool {
        self.me.as_ref().map(Player::is_player).unwrap_or(false)
    }
}

pub fn resolve_identity(players: &[Player], session_id: Option<&str>) -> PlayerIdentity {
    let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
        return PlayerIdentity::default();
    };
    let me = players.iter().find(|p| p.matches_session(session_id)).cloned();
    let opponent = match &me {
        Some(me) if me.is_player() => players
            .iter()
            .filter(|p| p.is_player())
            .find(|p| {
                p.id != me.id
                    && !p.matches_session(&me.id)
                    && match me.session_id.as_deref() {
                        Some(alias) => !p.matches_session(alias),
                        None => true,
                    }
            })
            .cloned(),
        _ => None,
    };
    PlayerIdentity {
        me_ready_key: me.as_ref().map(|p| p.ready_key().to_string()),
        opponent_ready_key: opponent.as_ref().map(|p| p.ready_key().to_string()),
        me,
        opponent,
    }
}
