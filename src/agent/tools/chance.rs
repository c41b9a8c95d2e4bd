//! Dice, coins, and random numbers

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use super::{Tool, parse_arguments};
use crate::{Error, Result};

/// Most dice one call may roll, so the answer stays speakable
const MAX_DICE: i64 = 100;

#[derive(Debug, Deserialize)]
struct DiceArgs {
    #[serde(default = "default_sides")]
    sides: i64,
    #[serde(default = "default_count")]
    count: i64,
}

const fn default_sides() -> i64 {
    6
}

const fn default_count() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct RangeArgs {
    #[serde(default = "default_min")]
    min: i64,
    #[serde(default = "default_max")]
    max: i64,
}

const fn default_min() -> i64 {
    1
}

const fn default_max() -> i64 {
    100
}

/// Rolls one or more dice
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceTool;

impl DiceTool {
    fn roll(rng: &mut impl Rng, sides: i64, count: i64) -> Result<String> {
        if sides < 1 || count < 1 {
            return Err(Error::Tool("sides and count must be at least 1".to_string()));
        }
        if count > MAX_DICE {
            return Err(Error::Tool(format!("at most {MAX_DICE} dice per roll")));
        }

        let rolls: Vec<i64> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
        if let [single] = rolls.as_slice() {
            return Ok(format!("Rolled {single}"));
        }
        let total: i64 = rolls.iter().sum();
        Ok(format!("Rolled {count}d{sides}: {rolls:?} = {total}"))
    }
}

#[async_trait]
impl Tool for DiceTool {
    fn name(&self) -> &'static str {
        "roll_dice"
    }

    fn description(&self) -> &'static str {
        "Roll dice and return the results."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sides": {"type": "integer", "description": "Sides on each die (default 6)"},
                "count": {"type": "integer", "description": "Number of dice (default 1)"},
            },
        })
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: DiceArgs = parse_arguments(arguments)?;
        Self::roll(&mut rand::thread_rng(), args.sides, args.count)
    }
}

/// Flips a coin
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinFlipTool;

#[async_trait]
impl Tool for CoinFlipTool {
    fn name(&self) -> &'static str {
        "flip_coin"
    }

    fn description(&self) -> &'static str {
        "Flip a coin and return heads or tails."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
        })
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        let heads = rand::thread_rng().gen_bool(0.5);
        Ok(if heads { "Heads" } else { "Tails" }.to_string())
    }
}

/// Picks a whole number in an inclusive range
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNumberTool;

impl RandomNumberTool {
    fn pick(rng: &mut impl Rng, min: i64, max: i64) -> Result<String> {
        if min >= max {
            return Err(Error::Tool("min must be less than max".to_string()));
        }
        Ok(rng.gen_range(min..=max).to_string())
    }
}

#[async_trait]
impl Tool for RandomNumberTool {
    fn name(&self) -> &'static str {
        "random_number"
    }

    fn description(&self) -> &'static str {
        "Generate a random whole number within an inclusive range."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "min": {"type": "integer", "description": "Smallest value (default 1)"},
                "max": {"type": "integer", "description": "Largest value (default 100)"},
            },
        })
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: RangeArgs = parse_arguments(arguments)?;
        Self::pick(&mut rand::thread_rng(), args.min, args.max)
    }
}
