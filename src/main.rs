//! haggle -- multi-expert LLM agent for supplier price negotiations.
//!
//! Thin CLI over the pipeline: one-shot `process` and `outreach`
//! subcommands for scripting, and an interactive `repl` that accumulates a
//! conversation across turns.

use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use haggle::config::HaggleConfig;
use haggle::context::ConversationContext;
use haggle::logging::LogMode;
use haggle::pipeline::{NegotiationPipeline, ProcessRequest};
use haggle::types::{AgentDecision, NegotiationStyle, OrderContext};

#[derive(Parser)]
#[command(name = "haggle", about = "LLM negotiation agent", version)]
struct Cli {
    /// Path to the config file (default: ./haggle.toml or $HAGGLE_CONFIG_PATH).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one supplier message and print the decision as JSON.
    Process {
        /// The supplier message; reads stdin when omitted.
        #[arg(long)]
        message: Option<String>,
        /// Merchant negotiation rules.
        #[arg(long, default_value = "")]
        rules: String,
        /// Merchant escalation triggers.
        #[arg(long, default_value = "")]
        triggers: String,
        /// Product name.
        #[arg(long)]
        sku: String,
        /// Supplier-side product reference.
        #[arg(long, default_value = "")]
        supplier_sku: String,
        /// Quantity to request, free-form.
        #[arg(long)]
        quantity: Option<String>,
    },
    /// Draft the initial outreach email for an order.
    Outreach {
        /// Product name.
        #[arg(long)]
        sku: String,
        /// Supplier-side product reference.
        #[arg(long, default_value = "")]
        supplier_sku: String,
        /// Quantity to request, free-form.
        #[arg(long)]
        quantity: Option<String>,
        /// State the target price upfront instead of asking for a quote.
        #[arg(long)]
        state_price: bool,
        /// Target/last-known unit price in USD.
        #[arg(long)]
        last_price: Option<f64>,
    },
    /// Interactive loop: paste supplier replies, watch decisions accumulate.
    Repl {
        /// Merchant negotiation rules.
        #[arg(long, default_value = "")]
        rules: String,
        /// Merchant escalation triggers.
        #[arg(long, default_value = "")]
        triggers: String,
        /// Product name.
        #[arg(long)]
        sku: String,
        /// Supplier-side product reference.
        #[arg(long, default_value = "")]
        supplier_sku: String,
        /// Quantity to request, free-form.
        #[arg(long)]
        quantity: Option<String>,
        /// Directory for rotating JSON logs.
        #[arg(long, default_value = "logs")]
        logs_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = HaggleConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Command::Process {
            message,
            rules,
            triggers,
            sku,
            supplier_sku,
            quantity,
        } => {
            let _log = haggle::logging::init(LogMode::OneShot)?;
            let pipeline = build_pipeline(&config)?;
            let message = match message {
                Some(m) => m,
                None => read_stdin()?,
            };
            let order_context = order(sku, supplier_sku, quantity, None, false);
            let decision = pipeline
                .process(&ProcessRequest {
                    supplier_message: message,
                    negotiation_rules: rules,
                    escalation_triggers: triggers,
                    order_context,
                    conversation_history: String::new(),
                    prior_extracted_data: None,
                    merchant_instructions: None,
                })
                .await;
            print_decision(&decision)?;
        }
        Command::Outreach {
            sku,
            supplier_sku,
            quantity,
            state_price,
            last_price,
        } => {
            let _log = haggle::logging::init(LogMode::OneShot)?;
            let pipeline = build_pipeline(&config)?;
            let order_context = order(sku, supplier_sku, quantity, last_price, state_price);
            let email = pipeline.generate_initial_email(&order_context).await?;
            println!("Subject: {}", email.subject_line);
            println!("\n{}", email.email_text);
        }
        Command::Repl {
            rules,
            triggers,
            sku,
            supplier_sku,
            quantity,
            logs_dir,
        } => {
            let _log = haggle::logging::init(LogMode::Repl {
                logs_dir: &logs_dir,
            })?;
            let pipeline = build_pipeline(&config)?;
            let order_context = order(sku, supplier_sku, quantity, None, false);
            run_repl(&pipeline, &order_context, &rules, &triggers).await?;
        }
    }

    Ok(())
}

fn build_pipeline(config: &HaggleConfig) -> Result<NegotiationPipeline> {
    let service = config.build_service()?;
    Ok(NegotiationPipeline::new(
        Arc::new(service),
        config.pipeline_options(),
    ))
}

fn order(
    sku_name: String,
    supplier_sku: String,
    quantity_requested: Option<String>,
    last_known_price: Option<f64>,
    state_price: bool,
) -> OrderContext {
    OrderContext {
        sku_name,
        supplier_sku,
        quantity_requested,
        last_known_price,
        negotiation_style: Some(if state_price {
            NegotiationStyle::StatePriceUpfront
        } else {
            NegotiationStyle::AskForQuote
        }),
    }
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .lock()
        .read_to_string(&mut text)
        .context("failed to read supplier message from stdin")?;
    Ok(text)
}

fn print_decision(decision: &AgentDecision) -> Result<()> {
    let json =
        serde_json::to_string_pretty(decision).context("failed to serialize decision")?;
    println!("{json}");
    Ok(())
}

/// Interactive loop. Each line is one supplier message; the conversation
/// context and merged extraction carry across turns.
async fn run_repl(
    pipeline: &NegotiationPipeline,
    order_context: &OrderContext,
    rules: &str,
    triggers: &str,
) -> Result<()> {
    info!(sku = %order_context.sku_name, "starting negotiation repl");
    println!("haggle repl -- paste a supplier message and press enter (ctrl-d to quit)");

    let mut context = ConversationContext::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("supplier> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        context.add_supplier_message(message);
        let prior = context.merged_data().clone();

        let decision = pipeline
            .process(&ProcessRequest {
                supplier_message: message.to_owned(),
                negotiation_rules: rules.to_owned(),
                escalation_triggers: triggers.to_owned(),
                order_context: order_context.clone(),
                conversation_history: context.format_for_prompt(),
                prior_extracted_data: (!prior.is_empty()).then_some(prior),
                merchant_instructions: None,
            })
            .await;

        if let Some(merged) = &decision.extracted_data {
            context.merge_extraction(merged);
        }
        if let haggle::types::ResponseArtifact::Counter(offer) = &decision.response {
            context.add_agent_message(offer.draft_email.clone());
        }
        if let haggle::types::ResponseArtifact::Clarification { email } = &decision.response {
            context.add_agent_message(email.clone());
        }

        print_decision(&decision)?;
    }

    Ok(())
}
