//! Event dispatch for token, tile and global scripts
//!
//! One dispatch runs, in order, the token's script for the event, the tile's
//! armed trigger and the campaign-wide global script. Each script gets a fresh
//! environment seeded from the token, and on success its environment is
//! written back before the next script runs. A failing script is recorded in
//! the [`DispatchReport`] and its environment is thrown away; its siblings
//! still run.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Value as Json};

use crate::entities::{Tile, Token};
use crate::scripting::{self, Environment, ScriptError, ScriptHost, Value};
use crate::value_objects::Tint;

pub const DEFAULT_MAX_TRIGGER_DEPTH: u32 = 3;

pub const EVENT_HP_CHANGE: &str = "onHPChange";
pub const EVENT_DEATH: &str = "onDeath";
pub const EVENT_MOVE: &str = "onMove";
pub const EVENT_SPAWN: &str = "onSpawn";

/// Returns a uniform integer in `[1, sides]`
pub type DiceRoller = Box<dyn Fn(i64) -> i64 + Send + Sync>;
/// Receives text passed to `say(...)`
pub type SayCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Where a script that ran during a dispatch was bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOrigin {
    Token,
    Tile,
    Global,
    /// Run directly through [`RulesEngine::run_command`]
    Command,
}

impl fmt::Display for ScriptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Token => "token",
            Self::Tile => "tile",
            Self::Global => "global",
            Self::Command => "command",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    pub event: String,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedScript {
    pub origin: ScriptOrigin,
    pub event: String,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFailure {
    pub origin: ScriptOrigin,
    pub event: String,
    pub depth: u32,
    pub error: ScriptError,
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} script for {} (depth {}): {}",
            self.origin, self.event, self.depth, self.error
        )
    }
}

/// What happened during one `run_event` call, nested dispatches included
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Every event that was dispatched, in order
    pub events: Vec<DispatchedEvent>,
    /// Every script that started executing, in order
    pub executed: Vec<ExecutedScript>,
    pub failures: Vec<ScriptFailure>,
    /// Dispatches dropped for exceeding the trigger depth
    pub depth_limit_hits: usize,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of times `event` was dispatched
    pub fn dispatch_count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.event == event).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} events, {} scripts, {} failed",
            self.events.len(),
            self.executed.len(),
            self.failures.len()
        )
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct RulesEngine {
    global_scripts: BTreeMap<String, String>,
    max_trigger_depth: u32,
    roller: DiceRoller,
    say: SayCallback,
}

impl fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulesEngine")
            .field("global_scripts", &self.global_scripts)
            .field("max_trigger_depth", &self.max_trigger_depth)
            .finish_non_exhaustive()
    }
}

impl RulesEngine {
    /// Creates an engine rolling dice with `roller`; `say` output is dropped
    /// until [`with_say`](Self::with_say) installs a callback.
    pub fn new(roller: impl Fn(i64) -> i64 + Send + Sync + 'static) -> Self {
        Self {
            global_scripts: BTreeMap::new(),
            max_trigger_depth: DEFAULT_MAX_TRIGGER_DEPTH,
            roller: Box::new(roller),
            say: Box::new(|_| {}),
        }
    }

    pub fn with_say(mut self, say: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.say = Box::new(say);
        self
    }

    pub fn with_max_trigger_depth(mut self, depth: u32) -> Self {
        self.max_trigger_depth = depth;
        self
    }

    pub fn max_trigger_depth(&self) -> u32 {
        self.max_trigger_depth
    }

    pub fn global_scripts(&self) -> &BTreeMap<String, String> {
        &self.global_scripts
    }

    pub fn global_script(&self, event: &str) -> Option<&str> {
        self.global_scripts.get(event).map(String::as_str)
    }

    /// Binds `script` to `event`, replacing any previous global script.
    pub fn set_global_script(&mut self, event: impl Into<String>, script: impl Into<String>) {
        self.global_scripts.insert(event.into(), script.into());
    }

    pub fn remove_global_script(&mut self, event: &str) -> Option<String> {
        self.global_scripts.remove(event)
    }

    /// `{"global": {event: script}}`
    pub fn to_json(&self) -> Json {
        json!({ "global": self.global_scripts })
    }

    /// Replaces the global scripts from `{"global": {...}}`. Anything
    /// malformed leaves an empty mapping; non-string scripts are skipped.
    pub fn load_from_json(&mut self, data: &Json) {
        self.global_scripts = data
            .get("global")
            .and_then(Json::as_object)
            .map(|global| {
                global
                    .iter()
                    .filter_map(|(event, script)| {
                        script.as_str().map(|s| (event.clone(), s.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
    }

    /// Dispatches `event` at depth 0.
    pub fn run_event(
        &self,
        event: &str,
        token: Option<&mut Token>,
        tile: Option<&mut Tile>,
        event_data: &Json,
    ) -> DispatchReport {
        self.run_event_at_depth(event, token, tile, event_data, 0)
    }

    pub fn run_event_at_depth(
        &self,
        event: &str,
        token: Option<&mut Token>,
        tile: Option<&mut Tile>,
        event_data: &Json,
        depth: u32,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.dispatch(event, token, tile, event_data, depth, &mut report);
        report
    }

    /// Runs one script outside any binding, e.g. a combat command. The token
    /// is reconciled and derived `onHPChange`/`onDeath` events fire exactly as
    /// for an event script; `name` is what the script sees as `event.type`.
    pub fn run_command(
        &self,
        name: &str,
        source: &str,
        token: Option<&mut Token>,
        tile: Option<&mut Tile>,
        event_data: &Json,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let ctx = Dispatch {
            event: name,
            data: event_data,
            depth: 0,
        };
        self.run_script(&ctx, ScriptOrigin::Command, source, token, tile, &mut report);
        report
    }

    fn dispatch(
        &self,
        event: &str,
        mut token: Option<&mut Token>,
        mut tile: Option<&mut Tile>,
        data: &Json,
        depth: u32,
        report: &mut DispatchReport,
    ) {
        if depth > self.max_trigger_depth {
            report.depth_limit_hits += 1;
            return;
        }
        report.events.push(DispatchedEvent {
            event: event.to_string(),
            depth,
        });

        let ctx = Dispatch { event, data, depth };

        let token_script = token
            .as_deref()
            .and_then(|t| t.script(event))
            .map(str::to_owned);
        if let Some(script) = token_script {
            self.run_script(
                &ctx,
                ScriptOrigin::Token,
                &script,
                token.as_deref_mut(),
                tile.as_deref_mut(),
                report,
            );
        }

        // A once-trigger is marked fired while it runs so a nested dispatch of
        // the same event cannot re-enter it. It stays fired only on success.
        let tile_script = tile
            .as_deref_mut()
            .and_then(Tile::trigger_mut)
            .filter(|trigger| trigger.is_armed_for(event))
            .map(|trigger| {
                if trigger.once {
                    trigger.fired = true;
                }
                (trigger.script.clone(), trigger.once)
            });
        if let Some((script, once)) = tile_script {
            let succeeded = self.run_script(
                &ctx,
                ScriptOrigin::Tile,
                &script,
                token.as_deref_mut(),
                tile.as_deref_mut(),
                report,
            );
            if once && !succeeded {
                if let Some(trigger) = tile.as_deref_mut().and_then(Tile::trigger_mut) {
                    trigger.fired = false;
                }
            }
        }

        if let Some(script) = self.global_scripts.get(event) {
            self.run_script(&ctx, ScriptOrigin::Global, script, token, tile, report);
        }
    }

    /// Runs one script and its derived events. Returns false when the script
    /// failed and its effects were discarded.
    fn run_script(
        &self,
        ctx: &Dispatch<'_>,
        origin: ScriptOrigin,
        source: &str,
        token: Option<&mut Token>,
        tile: Option<&mut Tile>,
        report: &mut DispatchReport,
    ) -> bool {
        if source.trim().is_empty() {
            return true;
        }
        report.executed.push(ExecutedScript {
            origin,
            event: ctx.event.to_string(),
            depth: ctx.depth,
        });

        let failure = |error| ScriptFailure {
            origin,
            event: ctx.event.to_string(),
            depth: ctx.depth,
            error,
        };

        let program = match scripting::parse(source) {
            Ok(program) => program,
            Err(error) => {
                report.failures.push(failure(error));
                return false;
            }
        };

        let mut env = seed_environment(token.as_deref(), ctx);
        let hp_before = token.as_deref().map(Token::hp);

        let mut host = DispatchHost {
            engine: self,
            ctx,
            token,
            tile,
            report,
        };
        let result = scripting::execute(&program, &mut env, &mut host);
        let DispatchHost {
            token,
            mut tile,
            report,
            ..
        } = host;

        if let Err(error) = result {
            report.failures.push(failure(error));
            return false;
        }
        let (Some(token), Some(hp_before)) = (token, hp_before) else {
            return true;
        };

        reconcile(&env, token);

        let derived_depth = ctx.depth + 1;
        if token.hp() != hp_before {
            self.dispatch(
                EVENT_HP_CHANGE,
                Some(&mut *token),
                tile.as_deref_mut(),
                ctx.data,
                derived_depth,
                report,
            );
        }
        if token.hp() <= 0 {
            self.dispatch(
                EVENT_DEATH,
                Some(token),
                tile,
                ctx.data,
                derived_depth,
                report,
            );
        }
        true
    }
}

/// Event being dispatched
struct Dispatch<'a> {
    event: &'a str,
    data: &'a Json,
    depth: u32,
}

/// Script capabilities for one execution
struct DispatchHost<'e, 'c, 't> {
    engine: &'e RulesEngine,
    ctx: &'c Dispatch<'c>,
    token: Option<&'t mut Token>,
    tile: Option<&'t mut Tile>,
    report: &'t mut DispatchReport,
}

impl ScriptHost for DispatchHost<'_, '_, '_> {
    fn roll(&mut self, sides: i64) -> i64 {
        (self.engine.roller)(sides).clamp(1, sides.max(1))
    }

    fn say(&mut self, text: &str) {
        (self.engine.say)(text);
    }

    /// Commits the script's state, runs the nested dispatch against the same
    /// token and tile, then reloads the token's state into the script.
    fn trigger(&mut self, event: &str, env: &mut Environment) {
        if let Some(token) = self.token.as_deref_mut() {
            reconcile(env, token);
        }
        self.engine.dispatch(
            event,
            self.token.as_deref_mut(),
            self.tile.as_deref_mut(),
            self.ctx.data,
            self.ctx.depth + 1,
            self.report,
        );
        if let Some(token) = self.token.as_deref() {
            load_token(env, token);
        }
    }
}

fn event_value(ctx: &Dispatch<'_>) -> Value {
    let mut event = BTreeMap::new();
    event.insert("type".to_string(), Value::from(ctx.event));
    event.insert("data".to_string(), Value::from_json(ctx.data));
    Value::Map(event)
}

fn tint_value(tint: Tint) -> Value {
    Value::Seq(tint.channels().into_iter().map(Value::Number).collect())
}

fn load_token(env: &mut Environment, token: &Token) {
    env.set("hp", token.hp() as f64);
    env.set("max_hp", token.max_hp() as f64);
    env.set("x", token.x());
    env.set("y", token.y());
    env.set("name", token.name());
    env.set("tint", tint_value(token.tint()));
}

fn seed_environment(token: Option<&Token>, ctx: &Dispatch<'_>) -> Environment {
    let mut env = Environment::new();
    match token {
        Some(token) => load_token(&mut env, token),
        None => {
            for var in ["hp", "max_hp", "x", "y"] {
                env.set(var, 0.0);
            }
            env.set("name", "");
            env.set("tint", tint_value(Tint::WHITE));
        }
    }
    env.set("event", event_value(ctx));
    env
}

/// Writes a script's environment back onto its token.
fn reconcile(env: &Environment, token: &mut Token) {
    let x = env.number("x").unwrap_or(token.x());
    let y = env.number("y").unwrap_or(token.y());
    token.set_position(x, y);

    let max_hp = env
        .number("max_hp")
        .unwrap_or(token.max_hp() as f64)
        .max(1.0);
    let hp = env
        .number("hp")
        .unwrap_or(token.hp() as f64)
        .clamp(0.0, max_hp);
    token.set_hit_points(hp as i64, max_hp as i64);

    if let Some(Value::Seq(items)) = env.get("tint") {
        let channels: Option<Vec<f64>> = items.iter().map(Value::as_number).collect();
        if let Some([r, g, b]) = channels.and_then(|c| <[f64; 3]>::try_from(c).ok()) {
            token.set_tint(Tint::new(r, g, b));
        }
    }
}
