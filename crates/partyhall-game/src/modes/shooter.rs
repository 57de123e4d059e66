//! Top-down arena shooter, simulated at 20 Hz.
//!
//! Every tick the room feeds each fighter's latest input through
//! `validate_action`, which only records an intent, then calls `tick`,
//! which applies all intents at once. An intent lasts a single tick.
//!
//! Movement keeps momentum: input accelerates the fighter, velocity decays
//! exponentially, and a fighter with no input glides to a stop rather than
//! freezing. A fighter at rest with no input stays exactly where it is.

use std::time::Duration;

use partyhall_protocol::{GameMode, Outcome, PlayerId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contract::to_view;
use crate::{
    ControlInput, Effect, GameFault, GameRules, MatchConfig, SeatedPlayer, Step, ValidationError,
    Verdict,
};

pub const ARENA_WIDTH: f32 = 1920.0;
pub const ARENA_HEIGHT: f32 = 1080.0;
pub const FIGHTER_SIZE: f32 = 36.0;
pub const BULLET_SIZE: f32 = 12.0;
pub const MAX_HEALTH: i32 = 100;
pub const ROUND_SECONDS: f32 = 120.0;

const ACCELERATION: f32 = 1200.0;
const MAX_SPEED: f32 = 200.0;
/// Exponential velocity decay rate, per second.
const DRAG: f32 = 4.0;
const BULLET_SPEED: f32 = 500.0;
const BULLET_LIFETIME: f32 = 2.0;
const BULLET_DAMAGE: i32 = 10;
const FIRE_COOLDOWN: f32 = 0.25;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Intent {
    pub move_x: f32,
    pub move_y: f32,
    pub fire: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fighter {
    pub player_id: PlayerId,
    pub name: String,
    pub team: u8,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Unit vector the fighter is aiming along.
    pub aim_x: f32,
    pub aim_y: f32,
    pub health: i32,
    pub alive: bool,
    /// Seconds until the fighter may fire again.
    pub cooldown: f32,
    #[serde(skip)]
    pub intent: Intent,
}

impl Fighter {
    fn overlaps(&self, bullet: &Bullet) -> bool {
        let reach = (FIGHTER_SIZE + BULLET_SIZE) / 2.0;
        (self.x - bullet.x).abs() < reach && (self.y - bullet.y).abs() < reach
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub id: u64,
    pub owner: PlayerId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Seconds left before the bullet disappears.
    pub ttl: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShooterState {
    pub tick: u64,
    /// Seconds of round time elapsed.
    pub elapsed: f32,
    /// In seat order.
    pub fighters: Vec<Fighter>,
    pub bullets: Vec<Bullet>,
    pub next_bullet_id: u64,
    pub result: Option<Outcome>,
}

impl ShooterState {
    fn fighter_mut(&mut self, player: PlayerId) -> Option<&mut Fighter> {
        self.fighters.iter_mut().find(|f| f.player_id == player)
    }

    fn teams_alive(&self) -> Vec<u8> {
        let mut teams: Vec<u8> = self.fighters.iter().filter(|f| f.alive).map(|f| f.team).collect();
        teams.sort_unstable();
        teams.dedup();
        teams
    }

    fn team_members(&self, team: u8) -> Vec<PlayerId> {
        self.fighters
            .iter()
            .filter(|f| f.team == team)
            .map(|f| f.player_id)
            .collect()
    }

    fn team_health(&self, team: u8) -> i32 {
        self.fighters
            .iter()
            .filter(|f| f.team == team && f.alive)
            .map(|f| f.health)
            .sum()
    }

    /// Sets `result` once at most one team stands or the round clock ran out.
    fn settle(&mut self) {
        if self.result.is_some() {
            return;
        }
        let teams = self.teams_alive();
        self.result = match teams.as_slice() {
            [] => Some(Outcome::Draw {
                reason: "everyone eliminated".into(),
            }),
            [team] => Some(Outcome::Win {
                winners: self.team_members(*team),
                ranking: Vec::new(),
                reason: "last team standing".into(),
            }),
            _ if self.elapsed >= ROUND_SECONDS => {
                let (red, blue) = (self.team_health(0), self.team_health(1));
                match red.cmp(&blue) {
                    std::cmp::Ordering::Greater => Some(self.time_win(0)),
                    std::cmp::Ordering::Less => Some(self.time_win(1)),
                    std::cmp::Ordering::Equal => Some(Outcome::Draw {
                        reason: "time limit".into(),
                    }),
                }
            }
            _ => None,
        };
    }

    fn time_win(&self, team: u8) -> Outcome {
        Outcome::Win {
            winners: self.team_members(team),
            ranking: Vec::new(),
            reason: "time limit".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// One tick of input. Missing fields default to idle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ShooterInput {
    pub move_x: f32,
    pub move_y: f32,
    pub aim_x: f32,
    pub aim_y: f32,
    pub fire: bool,
}

impl ShooterInput {
    fn is_finite(&self) -> bool {
        [self.move_x, self.move_y, self.aim_x, self.aim_y]
            .iter()
            .all(|v| v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Shooter;

impl GameRules for Shooter {
    type State = ShooterState;
    type Action = ShooterInput;

    const MODE: GameMode = GameMode::Shooter;
    const MIN_PLAYERS: usize = 2;
    const MAX_PLAYERS: usize = 8;
    const TICK_RATE_HZ: u32 = 20;

    fn initialize(seats: &[SeatedPlayer], _config: &MatchConfig) -> Result<ShooterState, GameFault> {
        super::check_seats::<Self>(seats)?;

        let radius = ARENA_WIDTH.min(ARENA_HEIGHT) * 0.35;
        let (cx, cy) = (ARENA_WIDTH / 2.0, ARENA_HEIGHT / 2.0);
        let count = seats.len() as f32;

        let fighters = seats
            .iter()
            .enumerate()
            .map(|(i, seat)| {
                let angle = std::f32::consts::TAU * i as f32 / count;
                let (sin, cos) = angle.sin_cos();
                Fighter {
                    player_id: seat.player_id,
                    name: seat.name.clone(),
                    team: (i % 2) as u8,
                    x: cx + radius * cos,
                    y: cy + radius * sin,
                    vx: 0.0,
                    vy: 0.0,
                    // Face the center.
                    aim_x: -cos,
                    aim_y: -sin,
                    health: MAX_HEALTH,
                    alive: true,
                    cooldown: 0.0,
                    intent: Intent::default(),
                }
            })
            .collect();

        Ok(ShooterState {
            tick: 0,
            elapsed: 0.0,
            fighters,
            bullets: Vec::new(),
            next_bullet_id: 1,
            result: None,
        })
    }

    fn validate_action(state: &ShooterState, actor: PlayerId, input: ShooterInput) -> Verdict<ShooterState> {
        if state.result.is_some() {
            return Verdict::Rejected(ValidationError::GameOver);
        }
        if !input.is_finite() {
            return Verdict::Rejected(ValidationError::Malformed("non-finite input".into()));
        }
        let mut next = state.clone();
        let Some(fighter) = next.fighter_mut(actor) else {
            return Verdict::Rejected(ValidationError::NotSeated);
        };
        if !fighter.alive {
            return Verdict::Rejected(ValidationError::Eliminated);
        }

        let (move_x, move_y) = clamp_to_unit(input.move_x, input.move_y);
        fighter.intent = Intent {
            move_x,
            move_y,
            fire: input.fire,
        };
        let aim_len = input.aim_x.hypot(input.aim_y);
        if aim_len > f32::EPSILON {
            fighter.aim_x = input.aim_x / aim_len;
            fighter.aim_y = input.aim_y / aim_len;
        }

        Verdict::accept(Step::quiet(next))
    }

    fn tick(state: &ShooterState, dt: Duration) -> Result<Step<ShooterState>, GameFault> {
        if state.result.is_some() {
            return Ok(Step::quiet(state.clone()));
        }
        let dt = dt.as_secs_f32();
        let mut next = state.clone();
        let mut effects = Vec::new();

        for fighter in next.fighters.iter_mut().filter(|f| f.alive) {
            integrate(fighter, dt);
        }

        let mut next_id = next.next_bullet_id;
        let mut spawned = Vec::new();
        for fighter in next.fighters.iter_mut().filter(|f| f.alive) {
            fighter.cooldown = (fighter.cooldown - dt).max(0.0);
            let fire = fighter.intent.fire && fighter.cooldown == 0.0;
            fighter.intent = Intent::default();
            if !fire {
                continue;
            }
            fighter.cooldown = FIRE_COOLDOWN;
            spawned.push(Bullet {
                id: next_id,
                owner: fighter.player_id,
                x: fighter.x,
                y: fighter.y,
                vx: fighter.aim_x * BULLET_SPEED,
                vy: fighter.aim_y * BULLET_SPEED,
                ttl: BULLET_LIFETIME,
            });
            next_id += 1;
        }
        next.next_bullet_id = next_id;
        for bullet in &spawned {
            effects.push(Effect::broadcast(json!({
                "event": "fired",
                "player": bullet.owner,
                "bullet": bullet.id,
            })));
        }
        next.bullets.extend(spawned);

        let bullets = std::mem::take(&mut next.bullets);
        for mut bullet in bullets {
            bullet.x += bullet.vx * dt;
            bullet.y += bullet.vy * dt;
            bullet.ttl -= dt;
            let in_arena = (0.0..=ARENA_WIDTH).contains(&bullet.x) && (0.0..=ARENA_HEIGHT).contains(&bullet.y);
            if bullet.ttl <= 0.0 || !in_arena {
                continue;
            }

            let target = next
                .fighters
                .iter_mut()
                .find(|f| f.alive && f.player_id != bullet.owner && f.overlaps(&bullet));
            let Some(target) = target else {
                next.bullets.push(bullet);
                continue;
            };

            target.health = (target.health - BULLET_DAMAGE).max(0);
            effects.push(Effect::broadcast(json!({
                "event": "hit",
                "player": target.player_id,
                "by": bullet.owner,
                "health": target.health,
            })));
            if target.health == 0 {
                target.alive = false;
                target.vx = 0.0;
                target.vy = 0.0;
                effects.push(Effect::broadcast(json!({
                    "event": "eliminated",
                    "player": target.player_id,
                    "by": bullet.owner,
                })));
            }
        }

        next.tick += 1;
        next.elapsed += dt;
        next.settle();
        Ok(Step::new(next, effects))
    }

    fn is_terminal(state: &ShooterState) -> Option<Outcome> {
        state.result.clone()
    }

    fn visibility_filter(state: &ShooterState, _viewer: Option<PlayerId>) -> Value {
        to_view(state)
    }

    fn forfeit(state: &ShooterState, player: PlayerId) -> Step<ShooterState> {
        if !state.fighters.iter().any(|f| f.player_id == player && f.alive) {
            return Step::quiet(state.clone());
        }
        let mut next = state.clone();
        if let Some(fighter) = next.fighter_mut(player) {
            fighter.alive = false;
            fighter.health = 0;
        }
        next.settle();
        let event = json!({ "event": "eliminated", "player": player, "by": null });
        Step::new(next, vec![Effect::broadcast(event)])
    }

    fn input_action(input: &ControlInput) -> Option<ShooterInput> {
        Some(ShooterInput {
            move_x: input.axis(0),
            move_y: input.axis(1),
            aim_x: input.axis(2),
            aim_y: input.axis(3),
            fire: input.primary(),
        })
    }

    /// Largest position error across fighters, in arena units.
    fn divergence(a: &ShooterState, b: &ShooterState) -> f32 {
        if a.fighters.len() != b.fighters.len() {
            return f32::INFINITY;
        }
        a.fighters
            .iter()
            .zip(&b.fighters)
            .map(|(p, q)| (p.x - q.x).hypot(p.y - q.y))
            .fold(0.0, f32::max)
    }
}

/// Applies one tick of movement physics to a living fighter.
fn integrate(fighter: &mut Fighter, dt: f32) {
    fighter.vx += fighter.intent.move_x * ACCELERATION * dt;
    fighter.vy += fighter.intent.move_y * ACCELERATION * dt;

    let decay = (-DRAG * dt).exp();
    fighter.vx *= decay;
    fighter.vy *= decay;

    let speed = fighter.vx.hypot(fighter.vy);
    if speed > MAX_SPEED {
        fighter.vx *= MAX_SPEED / speed;
        fighter.vy *= MAX_SPEED / speed;
    }

    let half = FIGHTER_SIZE / 2.0;
    (fighter.x, fighter.vx) = clamp_axis(fighter.x + fighter.vx * dt, fighter.vx, half, ARENA_WIDTH - half);
    (fighter.y, fighter.vy) = clamp_axis(fighter.y + fighter.vy * dt, fighter.vy, half, ARENA_HEIGHT - half);
}

/// Clamps a coordinate into `min..=max`, stopping motion on that axis at a wall.
fn clamp_axis(pos: f32, vel: f32, min: f32, max: f32) -> (f32, f32) {
    if pos < min {
        (min, 0.0)
    } else if pos > max {
        (max, 0.0)
    } else {
        (pos, vel)
    }
}

fn clamp_to_unit(x: f32, y: f32) -> (f32, f32) {
    let len = x.hypot(y);
    if len > 1.0 { (x / len, y / len) } else { (x, y) }
}
