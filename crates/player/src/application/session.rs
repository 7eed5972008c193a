//! Client-side session: the local copy of the table plus the rules engine.
//!
//! Server messages flow in through [`LocalSession::apply_server_message`];
//! local edits go through the other methods, run any scripts they trigger
//! and hand back the token records to broadcast. Nothing here touches the
//! network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use tabletop_domain::{
    CampaignFile, DispatchReport, DomainError, PropertyEdit, RulesEngine, SessionState, Token,
    TokenAction, TokenId, TokenRecord, TriggerKind, EVENT_MOVE, EVENT_SPAWN, PROTOCOL_VERSION,
};
use tabletop_shared::{ClientMessage, ServerMessage};

use crate::infrastructure::assets::AssetRegistry;
use crate::infrastructure::persistence::{self, LoadedCampaign, PersistenceError};
use crate::infrastructure::ports::RandomPort;
use crate::infrastructure::random::dice_roller;

/// What a server message changed, for whoever draws the table.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateReplaced { tokens: usize },
    TokenChanged(TokenId),
    Chat { from: String, message: String },
    ServerError(String),
    Pong { time: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub from: String,
    pub message: String,
}

pub struct LocalSession {
    state: SessionState,
    rules: RulesEngine,
    assets: AssetRegistry,
    chat: Vec<ChatLine>,
    script_output: Arc<Mutex<Vec<String>>>,
}

impl LocalSession {
    pub fn new(assets: AssetRegistry, random: Arc<dyn RandomPort>) -> Self {
        let script_output = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&script_output);
        let rules = RulesEngine::new(dice_roller(random)).with_say(move |text| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text.to_string());
        });

        Self {
            state: SessionState::new(),
            rules,
            assets,
            chat: Vec::new(),
            script_output,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RulesEngine {
        &mut self.rules
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn chat_log(&self) -> &[ChatLine] {
        &self.chat
    }

    /// Text scripts passed to `say(...)` since the last call.
    pub fn take_script_output(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .script_output
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    pub fn apply_server_message(&mut self, msg: ServerMessage) -> Vec<SessionEvent> {
        match msg {
            ServerMessage::State {
                protocol_version,
                snapshot,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    tracing::warn!(
                        server = protocol_version,
                        client = PROTOCOL_VERSION,
                        "State snapshot from a different protocol version"
                    );
                }
                for error in self.state.replace_all(snapshot, &self.assets) {
                    tracing::debug!(error = %error, "Skipped token record in state");
                }
                tracing::debug!(tokens = self.state.token_count(), "Session replaced");
                vec![SessionEvent::StateReplaced {
                    tokens: self.state.token_count(),
                }]
            }
            ServerMessage::TokenUpdate { token } => {
                let Some(record) = TokenRecord::from_value(&token) else {
                    tracing::debug!("Ignoring token_update without a token object");
                    return Vec::new();
                };
                match self.state.merge_token(&record, &self.assets) {
                    Ok(outcome) => vec![SessionEvent::TokenChanged(outcome.token_id().clone())],
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring token_update");
                        Vec::new()
                    }
                }
            }
            ServerMessage::Chat { from, message } => {
                self.chat.push(ChatLine {
                    from: from.clone(),
                    message: message.clone(),
                });
                vec![SessionEvent::Chat { from, message }]
            }
            ServerMessage::Pong { time } => vec![SessionEvent::Pong { time }],
            ServerMessage::Error { message } => {
                tracing::warn!(error = %message, "Server reported an error");
                vec![SessionEvent::ServerError(message)]
            }
            ServerMessage::Unknown => {
                tracing::debug!("Ignoring unknown server message");
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Drops a token (and its unlocked group) at `(x, y)`. Every token that
    /// moved gets `onMove`; when a tilemap exists and a token crossed into
    /// another cell it also gets `onLeaveTile` then `onEnterTile`.
    pub fn move_token(&mut self, id: &TokenId, x: f64, y: f64) -> Result<Vec<TokenRecord>, DomainError> {
        let before: HashMap<TokenId, (f64, f64)> = self
            .state
            .tokens()
            .iter()
            .map(|t| (t.id().clone(), t.position()))
            .collect();
        let moved = self.state.move_token(id, x, y)?;

        for token_id in &moved {
            let Some(from) = before.get(token_id).copied() else {
                continue;
            };
            let Some(to) = self.state.token(token_id).map(Token::position) else {
                continue;
            };
            let data = json!({"from": [from.0, from.1], "to": [to.0, to.1]});

            let (token, _) = self.state.script_targets(Some(token_id), None);
            let report = self.rules.run_event(EVENT_MOVE, token, None, &data);
            log_report(token_id, &report);

            let cells = self
                .state
                .tilemap()
                .map(|map| (map.world_to_tile(from.0, from.1), map.world_to_tile(to.0, to.1)));
            if let Some((old_cell, new_cell)) = cells.filter(|(old, new)| old != new) {
                self.dispatch_tile_event(token_id, TriggerKind::Leave, old_cell, &data);
                self.dispatch_tile_event(token_id, TriggerKind::Enter, new_cell, &data);
            }
        }

        self.records(&moved)
    }

    /// Spawns a token for a registered asset and dispatches `onSpawn`.
    pub fn spawn_token(&mut self, asset: &str, x: f64, y: f64) -> Result<TokenRecord, DomainError> {
        let id = self.state.spawn_token(asset, x, y, &self.assets)?.id().clone();
        tracing::info!(token_id = %id, asset = %asset, "Token spawned");

        let data = json!({"asset": asset, "at": [x, y]});
        let (token, _) = self.state.script_targets(Some(&id), None);
        let report = self.rules.run_event(EVENT_SPAWN, token, None, &data);
        log_report(&id, &report);

        self.record(&id)
    }

    pub fn apply_damage(&mut self, id: &TokenId, amount: u32) -> Result<TokenRecord, DomainError> {
        self.run_combat(id, "damage", amount)
    }

    pub fn heal(&mut self, id: &TokenId, amount: u32) -> Result<TokenRecord, DomainError> {
        self.run_combat(id, "heal", amount)
    }

    /// Damage and heal run as one-line scripts so `onHPChange` and `onDeath`
    /// fire exactly as they would from any other script.
    fn run_combat(&mut self, id: &TokenId, command: &str, amount: u32) -> Result<TokenRecord, DomainError> {
        let source = format!("{command}({amount})");
        let data = json!({ "amount": amount });

        let (token, _) = self.state.script_targets(Some(id), None);
        let Some(token) = token else {
            return Err(DomainError::not_found("Token", id.as_str()));
        };
        let report = self.rules.run_command(command, &source, Some(token), None, &data);
        log_report(id, &report);

        self.record(id)
    }

    /// Dispatches `onInteractTile` for the cell under the token.
    pub fn interact(&mut self, id: &TokenId) -> Result<TokenRecord, DomainError> {
        let position = self
            .state
            .token(id)
            .map(Token::position)
            .ok_or_else(|| DomainError::not_found("Token", id.as_str()))?;
        let cell = self
            .state
            .tilemap()
            .map(|map| map.world_to_tile(position.0, position.1));

        match cell {
            Some(cell) => self.dispatch_tile_event(id, TriggerKind::Interact, cell, &json!({})),
            None => {
                let (token, _) = self.state.script_targets(Some(id), None);
                let event = TriggerKind::Interact.event_name();
                let report = self.rules.run_event(event, token, None, &json!({}));
                log_report(id, &report);
            }
        }

        self.record(id)
    }

    fn dispatch_tile_event(&mut self, id: &TokenId, kind: TriggerKind, cell: (i64, i64), data: &Value) {
        let mut data = data.clone();
        if let Some(map) = data.as_object_mut() {
            map.insert("tile".to_string(), json!([cell.0, cell.1]));
        }

        let (token, tile) = self.state.script_targets(Some(id), Some(cell));
        let report = self.rules.run_event(kind.event_name(), token, tile, &data);
        log_report(id, &report);
    }

    pub fn apply_action(&mut self, id: &TokenId, action: TokenAction) -> Result<Vec<TokenRecord>, DomainError> {
        let changed = self.state.apply_action(id, action)?;
        self.records(&changed)
    }

    pub fn group(&mut self, ids: &[TokenId]) -> Result<Vec<TokenRecord>, DomainError> {
        let group_id = self.state.group_tokens(ids)?;
        tracing::debug!(group_id = %group_id, members = ids.len(), "Tokens grouped");
        self.records(ids)
    }

    pub fn apply_properties(&mut self, id: &TokenId, edit: PropertyEdit) -> Result<TokenRecord, DomainError> {
        self.state.apply_properties(id, edit)?;
        self.record(id)
    }

    /// Local delete only; peers keep the token until the next full state.
    pub fn remove_token(&mut self, id: &TokenId) -> Option<Token> {
        self.state.remove_token(id)
    }

    /// The whole session as a `state_update`, e.g. after loading a campaign.
    pub fn state_update_message(&self) -> ClientMessage {
        ClientMessage::state_update(&self.state.snapshot())
    }

    fn record(&self, id: &TokenId) -> Result<TokenRecord, DomainError> {
        self.state
            .token(id)
            .map(Token::to_record)
            .ok_or_else(|| DomainError::not_found("Token", id.as_str()))
    }

    fn records(&self, ids: &[TokenId]) -> Result<Vec<TokenRecord>, DomainError> {
        ids.iter().map(|id| self.record(id)).collect()
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Registers an image file as an asset and persists the registry.
    /// Placeholder tokens waiting for that name pick it up.
    pub fn register_asset(&mut self, file: &Path) -> Result<String, PersistenceError> {
        let name = self.assets.register(file)?;
        self.assets.save()?;
        self.state.refresh_placeholders(&self.assets);
        Ok(name)
    }

    pub fn save_campaign(
        &self,
        path: &Path,
        campaign_name: &str,
        saved_at: DateTime<Utc>,
    ) -> Result<CampaignFile, PersistenceError> {
        persistence::save_campaign(path, campaign_name, &self.state, &self.assets, &self.rules, saved_at)
    }

    pub fn load_campaign(&mut self, path: &Path) -> Result<LoadedCampaign, PersistenceError> {
        persistence::load_campaign(path, &mut self.state, &mut self.assets, &mut self.rules)
    }

    pub fn export_token(&self, path: &Path, id: &TokenId) -> Result<(), PersistenceError> {
        let token = self
            .state
            .token(id)
            .ok_or_else(|| DomainError::not_found("Token", id.as_str()))?;
        persistence::export_token(path, token)
    }

    pub fn import_token(&mut self, path: &Path) -> Result<TokenRecord, PersistenceError> {
        let id = persistence::import_token(path, &mut self.state, &self.assets)?;
        Ok(self.record(&id)?)
    }
}

fn log_report(token_id: &TokenId, report: &DispatchReport) {
    for failure in &report.failures {
        tracing::warn!(
            token_id = %token_id,
            origin = %failure.origin,
            event = %failure.event,
            depth = failure.depth,
            error = %failure.error,
            "Script failed"
        );
    }
    if report.depth_limit_hits > 0 {
        tracing::warn!(
            token_id = %token_id,
            hits = report.depth_limit_hits,
            "Trigger depth limit reached"
        );
    }
    tracing::trace!(token_id = %token_id, summary = %report.summary(), "Dispatch finished");
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tabletop_domain::{
        SessionSnapshot, Tile, TileTrigger, TileType, Tilemap, EVENT_DEATH, EVENT_HP_CHANGE,
    };
    use tempfile::TempDir;

    use super::*;

    struct FixedRandom(i64);

    impl RandomPort for FixedRandom {
        fn gen_range(&self, _min: i64, _max: i64) -> i64 {
            self.0
        }
    }

    fn session_with_goblin(dir: &TempDir) -> LocalSession {
        let image = dir.path().join("goblin.png");
        fs::write(&image, b"not really a png").expect("write asset");
        let mut assets = AssetRegistry::new(dir.path().join("assets"));
        assets.register(&image).expect("register");
        LocalSession::new(assets, Arc::new(FixedRandom(3)))
    }

    fn spawn(session: &mut LocalSession, x: f64, y: f64) -> TokenId {
        let record = session.spawn_token("goblin.png", x, y).expect("spawn");
        TokenId::parse(record.id().expect("id")).expect("token id")
    }

    #[test]
    fn test_server_token_update_is_merged() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);

        let events = session.apply_server_message(ServerMessage::TokenUpdate {
            token: json!({"id": "abc123", "asset": "goblin.png", "x": 100, "y": 200}),
        });
        let id = TokenId::parse("abc123").expect("id");
        assert_eq!(events, vec![SessionEvent::TokenChanged(id.clone())]);

        session.apply_server_message(ServerMessage::TokenUpdate {
            token: json!({"id": "abc123", "hp": 2}),
        });
        let token = session.state().token(&id).expect("token");
        assert_eq!(token.position(), (100.0, 200.0));
        assert_eq!(token.hp(), 2);
        assert!(!token.is_placeholder());
    }

    #[test]
    fn test_state_replaces_session_and_chat_is_logged() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        spawn(&mut session, 0.0, 0.0);

        let events = session.apply_server_message(ServerMessage::state(1, SessionSnapshot::default()));
        assert_eq!(events, vec![SessionEvent::StateReplaced { tokens: 0 }]);
        assert_eq!(session.state().token_count(), 0);

        session.apply_server_message(ServerMessage::chat("SERVER", "Bob joined."));
        assert_eq!(
            session.chat_log(),
            &[ChatLine {
                from: "SERVER".to_string(),
                message: "Bob joined.".to_string()
            }]
        );

        let events = session.apply_server_message(ServerMessage::error("Join required"));
        assert_eq!(events, vec![SessionEvent::ServerError("Join required".to_string())]);
        assert!(session.apply_server_message(ServerMessage::Unknown).is_empty());
    }

    #[test]
    fn test_spawn_runs_global_spawn_script() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        session
            .rules_mut()
            .set_global_script(EVENT_SPAWN, "say('spawned ' + event['data']['asset'])");

        let record = session.spawn_token("goblin.png", 10.0, 20.0).expect("spawn");

        assert_eq!(record.hp, Some(5));
        assert_eq!(session.take_script_output(), vec!["spawned goblin.png".to_string()]);
        assert!(session.take_script_output().is_empty());
    }

    #[test]
    fn test_spawn_unknown_asset_fails() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        assert!(session.spawn_token("dragon.png", 0.0, 0.0).is_err());
        assert_eq!(session.state().token_count(), 0);
    }

    #[test]
    fn test_move_fires_on_move_and_once_tile_trigger() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 10.0, 10.0);
        session
            .rules_mut()
            .set_global_script(EVENT_MOVE, "say(event['data']['to'][0])");

        let mut map = Tilemap::new(10, 10, 64);
        map.set_tile(
            Tile::new(1, 0, TileType::Floor)
                .with_trigger(TileTrigger::new(TriggerKind::Enter, "damage(2)").once()),
        );
        session.state.set_tilemap(Some(map));

        let records = session.move_token(&id, 70.0, 10.0).expect("move");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hp, Some(3));
        assert_eq!(session.take_script_output(), vec!["70".to_string()]);

        session.move_token(&id, 10.0, 10.0).expect("move back");
        let records = session.move_token(&id, 70.0, 10.0).expect("move again");
        assert_eq!(records[0].hp, Some(3));
    }

    #[test]
    fn test_move_within_cell_skips_tile_events() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 10.0, 10.0);
        session
            .rules_mut()
            .set_global_script("onEnterTile", "say('entered')");
        session.state.set_tilemap(Some(Tilemap::new(10, 10, 64)));

        session.move_token(&id, 20.0, 20.0).expect("move");
        assert!(session.take_script_output().is_empty());

        session.move_token(&id, 100.0, 20.0).expect("move");
        assert_eq!(session.take_script_output(), vec!["entered".to_string()]);
    }

    #[test]
    fn test_locked_token_does_not_move() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 0.0, 0.0);
        session.apply_action(&id, TokenAction::Lock).expect("lock");

        let records = session.move_token(&id, 50.0, 50.0).expect("move");

        assert!(records.is_empty());
        assert_eq!(session.state().token(&id).expect("token").position(), (0.0, 0.0));
    }

    #[test]
    fn test_damage_and_heal_fire_derived_events() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 0.0, 0.0);
        session
            .rules_mut()
            .set_global_script(EVENT_HP_CHANGE, "say(hp)");
        session
            .rules_mut()
            .set_global_script(EVENT_DEATH, "say('dead')");

        let record = session.apply_damage(&id, 2).expect("damage");
        assert_eq!(record.hp, Some(3));
        assert_eq!(session.take_script_output(), vec!["3".to_string()]);

        let record = session.heal(&id, 2).expect("heal");
        assert_eq!(record.hp, Some(5));
        session.take_script_output();

        let record = session.apply_damage(&id, 9).expect("damage");
        assert_eq!(record.hp, Some(0));
        // onDeath re-fires for every script run on a dead token, up to the depth bound
        let output = session.take_script_output();
        assert_eq!(output.first().map(String::as_str), Some("0"));
        assert!(output.iter().skip(1).all(|line| line == "dead"));
        assert!(output.len() > 1);
    }

    #[test]
    fn test_damage_unknown_token_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let missing = TokenId::parse("nobody").expect("id");
        assert!(session.apply_damage(&missing, 1).is_err());
    }

    #[test]
    fn test_interact_runs_tile_trigger_under_token() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 70.0, 10.0);
        let mut map = Tilemap::new(10, 10, 64);
        map.set_tile(
            Tile::new(1, 0, TileType::Door)
                .with_trigger(TileTrigger::new(TriggerKind::Interact, "heal(1)\nsay('door')")),
        );
        session.state.set_tilemap(Some(map));
        session.apply_damage(&id, 3).expect("damage");

        let record = session.interact(&id).expect("interact");

        assert_eq!(record.hp, Some(3));
        assert_eq!(session.take_script_output(), vec!["door".to_string()]);
    }

    #[test]
    fn test_group_returns_member_records() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let a = spawn(&mut session, 0.0, 0.0);
        let b = spawn(&mut session, 64.0, 0.0);

        let records = session.group(&[a.clone(), b.clone()]).expect("group");
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].group_id, Some(Some(_))));
        assert_eq!(records[0].group_id, records[1].group_id);

        let moved = session.move_token(&a, 10.0, 0.0).expect("move");
        assert_eq!(moved.len(), 2);
        assert_eq!(session.state().token(&b).expect("b").x(), 74.0);
    }

    #[test]
    fn test_properties_edit_returns_record() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 0.0, 0.0);

        let record = session
            .apply_properties(
                &id,
                PropertyEdit {
                    name: Some("Grub".to_string()),
                    hp: Some(50),
                    ..PropertyEdit::default()
                },
            )
            .expect("edit");

        assert_eq!(record.name.as_deref(), Some("Grub"));
        assert_eq!(record.hp, Some(5));
    }

    #[test]
    fn test_campaign_round_trip_through_session() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        let id = spawn(&mut session, 12.0, 34.0);
        session
            .rules_mut()
            .set_global_script(EVENT_DEATH, "say('gone')");
        let path = dir.path().join("campaigns").join("crypt.json");

        session
            .save_campaign(&path, "Crypt", Utc::now())
            .expect("save");

        let mut restored = LocalSession::new(
            AssetRegistry::new(dir.path().join("other")),
            Arc::new(FixedRandom(1)),
        );
        let loaded = restored.load_campaign(&path).expect("load");

        assert_eq!(loaded.campaign_name.as_deref(), Some("Crypt"));
        assert!(loaded.warnings.is_empty());
        let token = restored.state().token(&id).expect("token");
        assert_eq!(token.position(), (12.0, 34.0));
        assert!(!token.is_placeholder());
        assert_eq!(restored.rules().global_script(EVENT_DEATH), Some("say('gone')"));
    }

    #[test]
    fn test_state_update_message_carries_tokens() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_with_goblin(&dir);
        spawn(&mut session, 0.0, 0.0);

        let ClientMessage::StateUpdate { state } = session.state_update_message() else {
            panic!("expected state_update");
        };
        assert_eq!(state["tokens"].as_array().map(Vec::len), Some(1));
    }
}
