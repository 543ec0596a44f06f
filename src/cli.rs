use std::path::PathBuf;

use clap::Parser;
use colored::*;

use crate::config::Config;
use crate::node::Role;
use crate::providers::Provider;

#[derive(Parser, Debug)]
#[command(name = "branch-chat")]
#[command(version)]
#[command(about = "Branching chat conversations streamed from an LLM")]
pub struct Args {
    /// Message to send. Without it the loaded draft is printed and nothing is sent.
    pub prompt: Option<String>,

    /// LLM provider: openai or anthropic (overrides the config file)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name (e.g. gpt-4, claude-sonnet-4-20250514)
    #[arg(long)]
    pub model: Option<String>,

    /// System prompt for a new conversation
    #[arg(long)]
    pub system: Option<String>,

    /// Path to a TOML config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Draft key: continue the saved conversation and save it afterwards
    #[arg(long)]
    pub draft: Option<String>,

    /// Files to attach to the message (repeatable)
    #[arg(long = "attach", short)]
    pub attachments: Vec<PathBuf>,

    /// Store attachments as file references instead of embedding them
    #[arg(long)]
    pub external: bool,

    /// Re-ask the last answered prompt with this text, keeping the previous
    /// reply as a sibling branch
    #[arg(long)]
    pub branch: bool,

    /// Print the HTML preview of the reply after it finishes
    #[arg(long)]
    pub preview: bool,
}

/// Select the appropriate default model for the given provider when the user
/// hasn't explicitly chosen one (i.e. the model is still the other provider's default).
pub fn resolve_model(provider: &Provider, model: &str) -> String {
    let other_default = match provider {
        Provider::Openai => Provider::Anthropic.default_model(),
        Provider::Anthropic => Provider::Openai.default_model(),
    };
    if model == other_default {
        provider.default_model().to_string()
    } else {
        model.to_string()
    }
}

/// Layer command-line overrides on top of the file configuration.
pub fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(model) = &config.model {
        config.model = Some(resolve_model(&config.provider, model));
    }
    if let Some(system) = &args.system {
        config.system_prompt = system.clone();
    }
    if let Some(key) = &args.draft {
        config.draft_key = key.clone();
    }
    config
}

pub fn role_label(role: Role) -> ColoredString {
    match role {
        Role::System => "system".bright_magenta().bold(),
        Role::User => "user".bright_yellow().bold(),
        Role::Assistant => "assistant".bright_cyan().bold(),
    }
}

pub fn print_header(config: &Config) {
    println!("{}", "BRANCH CHAT".bright_cyan().bold());
    println!("{}", "=".repeat(50).bright_blue());
    println!(
        "{}: {}",
        "Provider".bright_yellow(),
        config.provider.to_string().bright_white()
    );
    println!("{}: {}", "Model".bright_yellow(), config.model());
    if !config.system_prompt.is_empty() {
        println!("{}: {}", "System".bright_yellow(), config.system_prompt);
    }
    println!("{}", "=".repeat(50).bright_blue());
}
