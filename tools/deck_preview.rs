/// Deck Preview — interactive shell for stepping through a storylet deck.
///
/// Usage: deck_preview --packet <path> [--seed <n>] [--specificity]
///
/// Commands:
///   reshuffle [trace]         — rebuild the draw pile
///   pile                      — show the draw pile
///   draw                      — draw the next storylet
///   play <id> [outcome]       — play a storylet
///   next [n]                  — reshuffle, then draw and play n storylets
///   hand <n>                  — draw n storylets, reshuffling as needed
///   eval <expr>               — evaluate an expression, with trace
///   tree <expr>               — show the parsed expression tree
///   set <name> <json>         — set a context variable
///   ctx                       — dump the context
///   reset                     — reset the play counter and cooldowns
///   help                      — list commands
///   quit                      — exit

use std::io::{self, BufRead, Write};
use std::path::Path;

use storylet_engine::core::context::dump_context;
use storylet_engine::{Context, Deck, Parser, Storylet, Value};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut packet_path = None;
    let mut seed: u64 = 42;
    let mut use_specificity = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--packet" if i + 1 < args.len() => {
                i += 1;
                packet_path = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            "--specificity" => use_specificity = true,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(packet_path) = packet_path else {
        eprintln!("Missing --packet <path>");
        print_usage();
        std::process::exit(1);
    };

    let mut deck = Deck::builder()
        .context(Context::new().into_shared())
        .seed(seed)
        .use_specificity(use_specificity)
        .build();
    if let Err(e) = deck.load_packet_file(Path::new(&packet_path), None) {
        eprintln!("ERROR: Failed to load packet: {}", e);
        std::process::exit(1);
    }

    println!("Loaded {} storylets", deck.len());
    println!("Seed: {}", seed);
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("deck> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "reshuffle" => {
                let mut trace = Vec::new();
                let traced = rest == "trace";
                match deck.reshuffle(None, traced.then_some(&mut trace)) {
                    Ok(()) => {
                        for line in &trace {
                            println!("  {}", line);
                        }
                        print_pile(&deck);
                    }
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "pile" => print_pile(&deck),
            "draw" => match deck.draw() {
                Ok(Some(storylet)) => print_storylet(&storylet),
                Ok(None) => println!("(draw pile is empty)"),
                Err(e) => println!("ERROR: {}", e),
            },
            "play" => {
                let mut parts = rest.split_whitespace();
                let Some(id) = parts.next() else {
                    println!("Usage: play <id> [outcome]");
                    continue;
                };
                let outcome = parts.next().unwrap_or("default");
                let Some(storylet) = deck.get_storylet(id) else {
                    println!("Unknown storylet: {}", id);
                    continue;
                };
                match deck.play(&storylet, outcome) {
                    Ok(()) => println!("Played '{}' ({}), counter = {}", id, outcome, deck.counter()),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "next" => {
                let count = if rest.is_empty() { Ok(1) } else { rest.parse::<usize>() };
                let Ok(count) = count else {
                    println!("Invalid count: {}", rest);
                    continue;
                };
                match deck.draw_and_play(count, None, None) {
                    Ok(played) if played.is_empty() => println!("(nothing eligible)"),
                    Ok(played) => played.iter().for_each(|s| print_storylet(s)),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "hand" => {
                let Ok(count) = rest.parse::<usize>() else {
                    println!("Usage: hand <n>");
                    continue;
                };
                match deck.draw_hand(count, true) {
                    Ok(hand) => {
                        println!("Drew {} of {}", hand.len(), count);
                        hand.iter().for_each(|s| print_storylet(s));
                    }
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "eval" => {
                let expression = match Parser::new().parse(rest) {
                    Ok(expression) => expression,
                    Err(e) => {
                        println!("Parse error: {}", e);
                        continue;
                    }
                };
                let mut trace = Vec::new();
                let result = expression.evaluate(&deck.context().borrow(), Some(&mut trace));
                for line in &trace {
                    println!("  {}", line);
                }
                match result {
                    Ok(value) => println!("= {}", value.quoted()),
                    Err(e) => println!("Evaluation error: {}", e),
                }
            }
            "tree" => match Parser::new().parse(rest) {
                Ok(expression) => {
                    println!("{}", expression);
                    print!("{}", expression.dump_structure());
                    println!("specificity: {}", expression.specificity());
                }
                Err(e) => println!("Parse error: {}", e),
            },
            "set" => {
                let Some((name, json)) = rest.split_once(char::is_whitespace) else {
                    println!("Usage: set <name> <json>");
                    continue;
                };
                match serde_json::from_str::<Value>(json.trim()) {
                    Ok(value) => {
                        deck.context().borrow_mut().set_value(name, value);
                        println!("{} set", name);
                    }
                    Err(e) => println!("Invalid value: {}", e),
                }
            }
            "ctx" => println!("{}", dump_context(&deck.context().borrow())),
            "reset" => {
                deck.reset();
                println!("Counter and cooldowns reset.");
            }
            other => println!("Unknown command: {}. Type 'help'.", other),
        }
    }
}

fn print_pile(deck: &Deck) {
    match deck.dump_draw_pile() {
        Ok(pile) if pile.is_empty() => println!("Draw pile: (empty)"),
        Ok(pile) => println!("Draw pile: {}", pile),
        Err(e) => println!("ERROR: {}", e),
    }
}

fn print_storylet(storylet: &Storylet) {
    let text = storylet
        .content
        .get("text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| storylet.content.to_string());
    println!("[{}] {}", storylet.id(), text);
}

fn print_usage() {
    println!("Usage: deck_preview --packet <path> [--seed <n>] [--specificity]");
}

fn print_help() {
    println!("Commands:");
    println!("  reshuffle [trace]     rebuild the draw pile");
    println!("  pile                  show the draw pile");
    println!("  draw                  draw the next storylet");
    println!("  play <id> [outcome]   play a storylet");
    println!("  next [n]              reshuffle, then draw and play n storylets");
    println!("  hand <n>              draw n storylets, reshuffling as needed");
    println!("  eval <expr>           evaluate an expression, with trace");
    println!("  tree <expr>           show the parsed expression tree");
    println!("  set <name> <json>     set a context variable");
    println!("  ctx                   dump the context");
    println!("  reset                 reset the play counter and cooldowns");
    println!("  quit                  exit");
}
