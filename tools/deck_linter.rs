/// Deck Linter — validates storylet packets before they ship.
///
/// Usage: deck_linter <packet_file_or_dir> [--strict]
///
/// Loads every `.ron`/`.json` packet into one deck, then checks each
/// storylet's expressions against the initial context: unknown variables
/// and functions, outcomes that update names the context never defines,
/// and conditions that fail to evaluate. `--strict` turns warnings into
/// errors.

use std::collections::BTreeSet;
use std::path::Path;
use std::process;

use storylet_engine::core::context::ContextExpr;
use storylet_engine::core::expression::{Expression, Node};
use storylet_engine::schema::storylet::Priority;
use storylet_engine::{Context, Deck, Storylet};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: deck_linter <packet_file_or_dir> [--strict]");
        process::exit(0);
    }

    let packet_path = Path::new(&args[1]);
    let strict = args[2..].iter().any(|a| a == "--strict");

    let mut deck = Deck::builder()
        .context(Context::new().into_shared())
        .seed(0)
        .build();
    let mut errors = Vec::new();

    if packet_path.is_file() {
        load_file(&mut deck, packet_path, &mut errors);
    } else if packet_path.is_dir() {
        load_dir(&mut deck, packet_path, &mut errors);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", packet_path.display());
        process::exit(1);
    }

    println!("Loaded {} storylets", deck.len());

    let (lint_errors, mut warnings) = lint_deck(&deck);
    errors.extend(lint_errors);
    if strict {
        errors.append(&mut warnings);
    }

    println!("\n=== Deck Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    process::exit(if errors.is_empty() { 0 } else { 1 });
}

fn load_file(deck: &mut Deck, path: &Path, errors: &mut Vec<String>) {
    match deck.load_packet_file(path, None) {
        Ok(()) => println!("  Loaded: {}", path.display()),
        Err(e) => errors.push(format!("{}: {}", path.display(), e)),
    }
}

fn load_dir(deck: &mut Deck, dir: &Path, errors: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        errors.push(format!("{}: cannot read directory", dir.display()));
        return;
    };
    let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            load_dir(deck, &path, errors);
        } else if matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("ron") | Some("json")
        ) {
            load_file(deck, &path, errors);
        }
    }
}

/// Names an expression reads: (variables, functions).
#[derive(Default)]
struct References {
    variables: BTreeSet<String>,
    functions: BTreeSet<String>,
}

impl References {
    fn collect(&mut self, node: &Node) {
        match node {
            Node::Literal(_) => {}
            Node::Variable(name) => {
                self.variables.insert(name.clone());
            }
            Node::FunctionCall { name, args } => {
                self.functions.insert(name.clone());
                for arg in args {
                    self.collect(arg);
                }
            }
            Node::Unary { operand, .. } => self.collect(operand),
            Node::Binary { left, right, .. } => {
                self.collect(left);
                self.collect(right);
            }
        }
    }

    fn collect_expression(&mut self, expression: &Expression) {
        self.collect(expression.root());
    }
}

fn lint_deck(deck: &Deck) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let ctx = deck.context().borrow();

    for storylet in deck.storylets() {
        let id = storylet.id();
        let mut refs = References::default();

        if let Some(condition) = storylet.condition() {
            refs.collect_expression(condition);
        }
        if let Priority::Expression(priority) = storylet.priority() {
            refs.collect_expression(priority);
        }
        for (outcome, updates) in storylet.outcomes() {
            for (name, expr) in updates.iter() {
                if !ctx.contains(name) {
                    errors.push(format!(
                        "'{}': outcome '{}' updates '{}', which the context never defines",
                        id, outcome, name
                    ));
                }
                if let ContextExpr::Expression(expression) = expr {
                    refs.collect_expression(expression);
                }
            }
        }

        for name in &refs.variables {
            if !ctx.contains(name) {
                warnings.push(format!("'{}': reads unknown variable '{}'", id, name));
            }
        }
        for name in &refs.functions {
            if !ctx.contains(name) {
                warnings.push(format!("'{}': calls unknown function '{}'", id, name));
            }
        }

        if let Err(e) = check_initial_state(storylet, &ctx) {
            warnings.push(format!("'{}': {}", id, e));
        }
    }

    if deck.is_empty() {
        warnings.push("packet defines no storylets".to_string());
    }

    (errors, warnings)
}

/// Evaluate condition and priority once against the initial context.
fn check_initial_state(storylet: &Storylet, ctx: &Context) -> Result<(), String> {
    storylet
        .check_condition(ctx, None)
        .map_err(|e| format!("condition fails on the initial context: {}", e))?;
    storylet
        .calc_current_priority(ctx, false, None)
        .map_err(|e| format!("priority fails on the initial context: {}", e))?;
    Ok(())
}
