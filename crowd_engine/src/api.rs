//! Control surface routes. Requests arrive as `{method, path, body}` and every
//! handler answers with a status code and a JSON body.

use crowd_core::access::{AccessDenied, BurnError, InjectGate, Remaining};
use crowd_core::inject::{InjectError, Injection};
use crowd_core::leaderboard::{Order, DEFAULT_LIMIT, HOURLY_LIMIT};
use crowd_core::wallet::short_address;
use crowd_core::ActiveGame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::state::{AppState, Economy, SwitchError};
use crate::vote_loop::{LoopClosed, Vote};

#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlResponse {
    pub status: u16,
    pub body: Value,
}

impl ControlResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => Self::new(200, value),
            Err(err) => Self::error(500, &format!("serialization failed: {err}")),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::new(status, json!({ "error": message }))
    }
}

impl From<LoopClosed> for ControlResponse {
    fn from(err: LoopClosed) -> Self {
        ControlResponse::error(503, &err.to_string())
    }
}

/// Early exits carry their own response, so both arms hold one.
type Reply = Result<ControlResponse, ControlResponse>;

pub async fn route(state: &AppState, request: ControlRequest) -> ControlResponse {
    match dispatch(state, request).await {
        Ok(response) | Err(response) => response,
    }
}

async fn dispatch(state: &AppState, request: ControlRequest) -> Reply {
    let (path, query) = match request.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (request.path.as_str(), None),
    };
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let method = request.method.to_ascii_uppercase();
    let body = request.body;

    match (method.as_str(), segments.as_slice()) {
        ("GET", ["api", "status"]) => status(state).await,
        ("GET", ["api", "votes"]) => Ok(ControlResponse::ok(&state.votes.stats().await?)),
        ("GET", ["api", "votes", "history"]) => {
            Ok(ControlResponse::ok(&state.votes.history().await?))
        }
        ("POST", ["api", "command"]) => manual_vote(state, body).await,
        ("POST", ["api", "command", "direct"]) => direct_command(state, body),
        ("GET", ["api", "controls"]) => Ok(controls(state)),
        ("GET", ["api", "commands"]) => Ok(commands(state)),
        ("GET", ["api", "games"]) => Ok(games(state)),
        ("POST", ["api", "game", "switch"]) => switch_game(state, body).await,
        ("GET", ["api", "emulator", "pending"]) => Ok(pending(state, query)),
        ("POST", ["api", "emulator", "ack"]) => acknowledge(state, body),
        ("GET", ["api", "leaderboard"]) => leaderboard(state, query).await,
        ("GET", ["api", "leaderboard", "hourly"]) => {
            let limit = query_param(query, "limit")
                .and_then(|value| value.parse().ok())
                .unwrap_or(HOURLY_LIMIT);
            Ok(ControlResponse::ok(&state.votes.hourly_leaderboard(limit).await?))
        }
        ("GET", ["api", "user", identity]) => match state.votes.profile(identity).await? {
            Some(profile) => Ok(ControlResponse::ok(&profile)),
            None => Err(ControlResponse::error(404, "user not found")),
        },
        ("GET", ["api", "combos"]) => Ok(ControlResponse::ok(
            &json!({ "combos": state.votes.combos().await? }),
        )),
        ("GET", ["api", "combos", "stats"]) => {
            Ok(ControlResponse::ok(&state.votes.combo_stats().await?))
        }
        (_, ["api", "champions", ..])
        | (_, ["api", "team-rocket", ..])
        | (_, ["api", "wallet", ..]) => match state.economy.as_ref() {
            Some(economy) => economy_route(state, economy, &method, &segments, body).await,
            None => Err(ControlResponse::error(400, "Economy not enabled")),
        },
        _ => Err(ControlResponse::error(404, "Not found")),
    }
}

async fn economy_route(
    state: &AppState,
    economy: &Economy,
    method: &str,
    segments: &[&str],
    body: Value,
) -> Reply {
    match (method, segments) {
        ("GET", ["api", "champions", "tiers"]) => Ok(ControlResponse::ok(
            &json!({ "tiers": economy.balances.tiers() }),
        )),
        ("GET", ["api", "champions", "status", identity]) => {
            champion_status(economy, identity).await
        }
        ("POST", ["api", "champions", "inject"]) => champion_inject(state, economy, body),
        ("POST", ["api", "champions", "set-balance"]) => set_balance(economy, body),
        ("GET", ["api", "team-rocket", "tiers"]) => Ok(ControlResponse::ok(
            &json!({ "tiers": economy.burns.tiers() }),
        )),
        ("GET", ["api", "team-rocket", "status", identity]) => {
            Ok(burn_status(economy, identity))
        }
        ("POST", ["api", "team-rocket", "burn"]) => record_burn(economy, body).await,
        ("POST", ["api", "team-rocket", "inject"]) => burn_inject(state, economy, body),
        ("POST", ["api", "wallet", "register"]) => register_wallet(economy, body),
        ("POST", ["api", "wallet", "lock"]) => lock_wallet(economy, body),
        ("GET", ["api", "wallet", "stats"]) => {
            Ok(ControlResponse::ok(&economy.wallets().stats()))
        }
        ("GET", ["api", "wallet", identity]) => Ok(wallet(economy, identity)),
        _ => Err(ControlResponse::error(404, "Not found")),
    }
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, ControlResponse> {
    let body = if body.is_null() { json!({}) } else { body };
    serde_json::from_value(body)
        .map_err(|err| ControlResponse::error(400, &format!("Invalid request body: {err}")))
}

fn game_summary(game: &ActiveGame) -> Value {
    json!({ "id": game.id, "name": game.name, "system": game.system })
}

fn invalid_command(valid: Vec<String>) -> ControlResponse {
    ControlResponse::new(400, json!({ "error": "Invalid command", "valid": valid }))
}

fn inject_failure(err: InjectError) -> ControlResponse {
    match err {
        InjectError::InvalidCommand { valid } => invalid_command(valid),
        InjectError::AccessDenied(denied) => access_denied(denied),
    }
}

fn access_denied(denied: AccessDenied) -> ControlResponse {
    ControlResponse::new(
        403,
        json!({ "error": denied.message, "tier": denied.tier, "reason": denied.reason }),
    )
}

async fn status(state: &AppState) -> Reply {
    let votes = state.votes.stats().await?;
    let game = game_summary(state.grammar().game());
    let emulator = state.queue.lock().status();
    Ok(ControlResponse::ok(&json!({
        "game": game,
        "votes": votes,
        "emulator": emulator,
        "features": state.features,
    })))
}

#[derive(Deserialize)]
struct ManualVoteBody {
    command: Option<String>,
    username: Option<String>,
}

async fn manual_vote(state: &AppState, body: Value) -> Reply {
    let body: ManualVoteBody = parse_body(body)?;
    let Some(raw) = body.command else {
        return Err(ControlResponse::error(400, "Missing command"));
    };
    let parsed = state.grammar().parse(&raw);
    let Some(command) = parsed else {
        return Err(invalid_command(state.grammar().valid_commands()));
    };
    let (identity, display_name) = match body.username {
        Some(name) => (name.clone(), name),
        None => ("admin_test".to_string(), "Admin".to_string()),
    };
    let accepted = state
        .votes
        .vote(Vote {
            identity,
            display_name,
            command: command.clone(),
            weight: 1.0,
        })
        .await?;
    Ok(ControlResponse::ok(
        &json!({ "success": accepted, "parsed": command }),
    ))
}

#[derive(Deserialize)]
struct DirectBody {
    command: Option<String>,
    team: Option<u8>,
}

fn direct_command(state: &AppState, body: Value) -> Reply {
    let body: DirectBody = parse_body(body)?;
    let Some(raw) = body.command else {
        return Err(ControlResponse::error(400, "Missing command"));
    };
    let injection = state
        .injector
        .inject_remote(&state.grammar(), &raw, body.team)
        .map_err(inject_failure)?;
    Ok(ControlResponse::ok(&json!({
        "success": true,
        "id": injection.result.id,
        "parsed": injection.result.command,
        "team": injection.result.team,
    })))
}

fn controls(state: &AppState) -> ControlResponse {
    let grammar = state.grammar();
    let game = grammar.game();
    ControlResponse::ok(&json!({
        "game": game_summary(game),
        "buttons": game.buttons,
        "aliases": game.aliases,
        "command_prefixes": game.command_prefixes,
        "hold": game.hold,
        "multiplayer": game.multiplayer,
        "vote_window_ms": game.vote_window.as_millis() as u64,
    }))
}

fn commands(state: &AppState) -> ControlResponse {
    let commands = state.grammar().valid_commands();
    ControlResponse::ok(&json!({ "commands": commands }))
}

fn games(state: &AppState) -> ControlResponse {
    let active = state.grammar().game().id.clone();
    let games: Vec<Value> = state
        .catalog()
        .games()
        .map(|game| {
            json!({
                "id": game.id,
                "name": game.name,
                "system": game.system,
                "active": game.id == active,
            })
        })
        .collect();
    ControlResponse::ok(&json!({ "games": games }))
}

#[derive(Deserialize)]
struct SwitchBody {
    #[serde(alias = "game_id", rename = "gameId")]
    game_id: Option<String>,
}

async fn switch_game(state: &AppState, body: Value) -> Reply {
    let body: SwitchBody = parse_body(body)?;
    let Some(game_id) = body.game_id else {
        return Err(ControlResponse::error(400, "Missing gameId"));
    };
    match state.switch_game(&game_id).await {
        Ok(active) => Ok(ControlResponse::ok(
            &json!({ "success": true, "game": game_summary(&active) }),
        )),
        Err(SwitchError::Config(err)) => Err(ControlResponse::error(400, &err.to_string())),
        Err(SwitchError::Loop(err)) => Err(err.into()),
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query
        .into_iter()
        .flat_map(|query| query.split('&'))
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then_some(value)
        })
}

async fn leaderboard(state: &AppState, query: Option<&str>) -> Reply {
    let limit = query_param(query, "limit")
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);
    let order = query_param(query, "order").map_or(Order::Points, Order::parse);
    Ok(ControlResponse::ok(&state.votes.leaderboard(limit, order).await?))
}

fn pending(state: &AppState, query: Option<&str>) -> ControlResponse {
    let after = query_param(query, "after")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    let queue = state.queue.lock();
    ControlResponse::ok(&json!({
        "commands": queue.pending(after),
        "last_ack_id": queue.status().last_ack_id,
    }))
}

#[derive(Deserialize)]
struct AckBody {
    #[serde(alias = "lastId")]
    last_id: Option<u64>,
}

fn acknowledge(state: &AppState, body: Value) -> Reply {
    let body: AckBody = parse_body(body)?;
    let Some(last_id) = body.last_id else {
        return Err(ControlResponse::error(400, "last_id required"));
    };
    let report = state.queue.lock().acknowledge(last_id);
    Ok(ControlResponse::ok(&json!({
        "success": true,
        "acknowledged": report.acknowledged,
        "queue_remaining": report.queue_remaining,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InjectBody {
    #[serde(alias = "user_key")]
    user_key: Option<String>,
    command: Option<String>,
}

impl InjectBody {
    fn require(self) -> Result<(String, String), ControlResponse> {
        match (self.user_key, self.command) {
            (Some(user_key), Some(command)) => Ok((user_key, command)),
            _ => Err(ControlResponse::error(400, "userKey and command required")),
        }
    }
}

const NO_WALLET_HINT: &str = "No wallet registered. Use !wallet <address>";

async fn champion_status(economy: &Economy, identity: &str) -> Reply {
    let Some(wallet) = economy.wallet_address(identity) else {
        return Ok(ControlResponse::ok(&json!({
            "identity": identity,
            "tier": null,
            "message": NO_WALLET_HINT,
        })));
    };
    let check = economy.balances.check_balance(identity, &wallet).await;
    let (can_inject, remaining, message) = match economy.balances.can_inject(identity) {
        Ok(permit) => (true, Some(permit.remaining()), None),
        Err(denied) => (false, None, Some(denied.message)),
    };
    Ok(ControlResponse::ok(&json!({
        "identity": identity,
        "wallet": wallet,
        "balance": check.balance,
        "tier": check.tier,
        "label": check.label,
        "verified": check.verified,
        "can_inject": can_inject,
        "commands_remaining": remaining,
        "commands_used": economy.balances.hourly_used(identity),
        "message": message,
    })))
}

fn champion_inject(state: &AppState, economy: &Economy, body: Value) -> Reply {
    let (identity, raw) = parse_body::<InjectBody>(body)?.require()?;
    if economy.wallet_address(&identity).is_none() {
        return Err(ControlResponse::error(403, "No wallet registered"));
    }
    let injection = state
        .injector
        .inject_gated(&economy.balances, &state.grammar(), &identity, &raw)
        .map_err(inject_failure)?;
    let remaining = match injection.remaining {
        Some(Remaining::Unlimited) => json!("unlimited"),
        Some(Remaining::Count(count)) => json!(count),
        None => Value::Null,
    };
    Ok(injected(&injection, remaining))
}

fn burn_inject(state: &AppState, economy: &Economy, body: Value) -> Reply {
    let (identity, raw) = parse_body::<InjectBody>(body)?.require()?;
    let injection = state
        .injector
        .inject_gated(&economy.burns, &state.grammar(), &identity, &raw)
        .map_err(inject_failure)?;
    let remaining = json!(injection.remaining);
    Ok(injected(&injection, remaining))
}

fn injected(injection: &Injection, remaining: Value) -> ControlResponse {
    ControlResponse::ok(&json!({
        "success": true,
        "id": injection.result.id,
        "command": injection.result.command,
        "remaining": remaining,
        "tier": injection.tier,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceBody {
    #[serde(alias = "user_key")]
    user_key: Option<String>,
    balance: Option<f64>,
}

fn set_balance(economy: &Economy, body: Value) -> Reply {
    let body: BalanceBody = parse_body(body)?;
    let (Some(identity), Some(balance)) = (body.user_key, body.balance) else {
        return Err(ControlResponse::error(400, "userKey and balance required"));
    };
    if !balance.is_finite() || balance < 0.0 {
        return Err(ControlResponse::error(400, "balance must be a non-negative number"));
    }
    let check = economy.balances.set_balance(&identity, balance);
    Ok(ControlResponse::ok(&json!({
        "success": true,
        "balance": check.balance,
        "tier": check.tier,
        "label": check.label,
    })))
}

fn burn_status(economy: &Economy, identity: &str) -> ControlResponse {
    let status = economy.burns.burn_status(identity);
    let mut body = match serde_json::to_value(&status) {
        Ok(body) => body,
        Err(err) => return ControlResponse::error(500, &format!("serialization failed: {err}")),
    };
    body["identity"] = json!(identity);
    body["wallet"] = json!(economy.wallet_address(identity));
    ControlResponse::new(200, body)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BurnBody {
    #[serde(alias = "user_key")]
    user_key: Option<String>,
    amount: Option<f64>,
    #[serde(alias = "tx_signature")]
    tx_signature: Option<String>,
}

async fn record_burn(economy: &Economy, body: Value) -> Reply {
    let body: BurnBody = parse_body(body)?;
    let Some(identity) = body.user_key else {
        return Err(ControlResponse::error(400, "userKey required"));
    };
    let receipt = match (body.tx_signature, body.amount) {
        (Some(signature), _) => {
            let Some(wallet) = economy.wallet_address(&identity) else {
                return Err(ControlResponse::error(
                    400,
                    "Register a wallet first with !wallet <address>",
                ));
            };
            economy
                .burns
                .verify_and_record(&identity, &signature, &wallet)
                .await
        }
        (None, Some(amount)) => economy.burns.record_burn(&identity, amount, None),
        (None, None) => {
            return Err(ControlResponse::error(400, "amount or txSignature required"));
        }
    };

    match receipt {
        Ok(receipt) => {
            let status = economy.burns.burn_status(&identity);
            let message = match receipt.tier {
                Some(_) => format!(
                    "Burned {}. Total {} ({})",
                    receipt.amount, receipt.total, status.tier_label
                ),
                None => format!("Burned {}. Total {}", receipt.amount, receipt.total),
            };
            Ok(ControlResponse::ok(&json!({
                "success": true,
                "total_burned": receipt.total,
                "tier": receipt.tier,
                "verified": receipt.verified,
                "message": message,
            })))
        }
        Err(BurnError::Duplicate(_)) => {
            Err(ControlResponse::error(409, "Transaction already recorded"))
        }
        Err(err) => Err(ControlResponse::error(400, &err.to_string())),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletBody {
    #[serde(alias = "user_key")]
    user_key: Option<String>,
    #[serde(alias = "username")]
    display_name: Option<String>,
    #[serde(alias = "wallet_address", alias = "address")]
    wallet_address: Option<String>,
}

fn register_wallet(economy: &Economy, body: Value) -> Reply {
    let body: WalletBody = parse_body(body)?;
    let (Some(identity), Some(address)) = (body.user_key, body.wallet_address) else {
        return Err(ControlResponse::error(400, "userKey and walletAddress required"));
    };
    let display_name = body.display_name.unwrap_or_else(|| identity.clone());
    let registered = economy
        .wallets()
        .register(&identity, &display_name, address.trim())
        .cloned();
    match registered {
        Ok(info) => Ok(ControlResponse::ok(&json!({
            "success": true,
            "message": format!("Wallet {} registered", short_address(&info.wallet_address)),
            "wallet": info,
        }))),
        Err(err) => Err(ControlResponse::new(
            400,
            json!({ "success": false, "error": err.to_string() }),
        )),
    }
}

fn lock_wallet(economy: &Economy, body: Value) -> Reply {
    let body: WalletBody = parse_body(body)?;
    let Some(identity) = body.user_key else {
        return Err(ControlResponse::error(400, "userKey required"));
    };
    let locked = economy.wallets().lock(&identity);
    match locked {
        Ok(()) => Ok(ControlResponse::ok(&json!({ "success": true }))),
        Err(err) => Err(ControlResponse::new(
            400,
            json!({ "success": false, "error": err.to_string() }),
        )),
    }
}

fn wallet(economy: &Economy, identity: &str) -> ControlResponse {
    match economy.wallets().wallet(identity) {
        Some(info) => ControlResponse::ok(&json!({ "registered": true, "wallet": info })),
        None => ControlResponse::ok(&json!({ "registered": false })),
    }
}
