use botfleet_core::models::{EventOutcome, WorkerConfig};
use botfleet_core::{FleetError, FleetResult};
use rand::Rng;

use crate::bot::Bot;
use crate::handlers::{any_text, HandlerTable, Invocation, DEFAULT_PRIORITY};

const RANGE_USAGE: &str = "❌ Please provide two numbers: minimum and maximum\nExample: /range 1 10";

/// 随机数生成和数字分析
#[derive(Debug)]
pub struct NumbersBot {
    random_max: i64,
}

impl Default for NumbersBot {
    fn default() -> Self {
        Self { random_max: 100 }
    }
}

fn is_number(text: &str) -> bool {
    let text = text.trim();
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let mut parts = unsigned.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    digits(whole) && parts.next().map_or(true, digits)
}

pub fn analyze(number: f64) -> Vec<String> {
    let mut lines = vec![format!("📊 Analysis of number {number}:")];
    let integer = number.fract() == 0.0;

    lines.push(if integer {
        "• This is an integer".to_string()
    } else {
        "• This is a decimal number".to_string()
    });

    lines.push(
        if number > 0.0 {
            "• Positive number"
        } else if number < 0.0 {
            "• Negative number"
        } else {
            "• Zero"
        }
        .to_string(),
    );

    if integer {
        lines.push(if number % 2.0 == 0.0 {
            "• Even number".to_string()
        } else {
            "• Odd number".to_string()
        });
    }
    lines
}

impl NumbersBot {
    fn cmd_start(&mut self, _inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        Ok(EventOutcome::reply(
            "👋 Welcome to Numbers Bot!\n\n\
             I can help you with numbers. Try these commands:\n\
             /random - Generate a random number\n\
             /range - Generate a number in a specific range\n\
             Or just send me any number to validate it!",
        ))
    }

    fn cmd_random(&mut self, _inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        let number = rand::rng().random_range(1..=self.random_max);
        Ok(EventOutcome::reply(format!("🎲 Your random number is: {number}")))
    }

    fn cmd_range(&mut self, inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        let bounds = match inv.args.as_slice() {
            [low, high] => low.parse::<i64>().ok().zip(high.parse::<i64>().ok()),
            _ => None,
        };
        match bounds {
            Some((low, high)) if low < high => {
                let number = rand::rng().random_range(low..=high);
                Ok(EventOutcome::reply(format!(
                    "🎯 Your random number between {low} and {high} is: {number}"
                )))
            }
            _ => Ok(EventOutcome::rejected("invalid range arguments").with_reply(RANGE_USAGE)),
        }
    }

    fn on_number(&mut self, inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        let number: f64 = inv
            .message
            .text
            .trim()
            .parse()
            .map_err(|e| FleetError::Processing(format!("数字解析失败: {e}")))?;
        Ok(EventOutcome::reply(analyze(number).join("\n")))
    }

    fn on_other_text(&mut self, _inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        Ok(EventOutcome::rejected("not a number").with_reply(
            "🔢 Please send me a number to analyze it!\n\
             You can also use these commands:\n\
             /random - Generate a random number\n\
             /range - Generate a number in a specific range",
        ))
    }
}

impl Bot for NumbersBot {
    fn name(&self) -> &'static str {
        "NumbersBot"
    }

    fn description(&self) -> &'static str {
        "A bot for number-related operations"
    }

    fn configure(&mut self, config: &WorkerConfig) -> FleetResult<()> {
        if let Some(value) = config.get("random_max") {
            let max = value
                .as_i64()
                .filter(|max| *max >= 1)
                .ok_or_else(|| FleetError::Configuration(format!("random_max 必须是正整数: {value}")))?;
            self.random_max = max;
        }
        Ok(())
    }

    fn register(table: &mut HandlerTable<Self>) {
        table
            .command("start", "Start the bot", Self::cmd_start)
            .command("random", "Generate a random number", Self::cmd_random)
            .command("range", "Generate a number in a specific range", Self::cmd_range)
            .text(is_number, DEFAULT_PRIORITY, Self::on_number)
            .text(any_text, DEFAULT_PRIORITY + 1, Self::on_other_text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_number() {
        for ok in ["0", "42", "-7", "3.14", " 10 "] {
            assert!(is_number(ok), "{ok}");
        }
        for bad in ["", "-", "1.", ".5", "1e3", "abc", "1.2.3"] {
            assert!(!is_number(bad), "{bad}");
        }
    }

    #[test]
    fn test_analyze() {
        assert_eq!(
            analyze(4.0),
            vec![
                "📊 Analysis of number 4:",
                "• This is an integer",
                "• Positive number",
                "• Even number"
            ]
        );
        let decimal = analyze(-2.5);
        assert!(decimal.contains(&"• This is a decimal number".to_string()));
        assert!(decimal.contains(&"• Negative number".to_string()));
        assert_eq!(decimal.len(), 3);
        assert!(analyze(0.0).contains(&"• Zero".to_string()));
    }
}
