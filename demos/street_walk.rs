/// Street Walk example — a rainy stroll driven by a storylet deck.
///
/// Loads the bundled street packet, registers a host function, and plays
/// ten steps: the first few with a synchronous reshuffle, the rest with an
/// async reshuffle pumped by an `update()` loop the way a game frame would.
///
/// Run with: cargo run --example street_walk

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use storylet_engine::core::context::dump_context;
use storylet_engine::core::deck::ReshuffleProgress;
use storylet_engine::{Context, Deck, Storylet, Value};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Shared context with a host function ---
    let mut context = Context::new();
    context.set_function("hour", 0, |_| Value::Number(21.0));
    let context = context.into_shared();

    let mut deck = Deck::builder()
        .context(Rc::clone(&context))
        .seed(2026)
        .use_specificity(true)
        .async_chunk_size(2)
        .build();
    deck.load_packet_file(Path::new("demos/data/streets.json"), None)
        .expect("Failed to load street packet");

    println!("=== A Rainy Walk ({} storylets) ===\n", deck.len());

    // --- Synchronous steps ---
    for step in 1..=4 {
        match deck
            .draw_and_play_single(None, None)
            .expect("Failed to play a step")
        {
            Some(storylet) => narrate(step, &storylet),
            None => println!("{:>2}. Nothing happens.", step),
        }
    }

    // --- Async steps: one reshuffle spread over several frames ---
    for step in 5..=10 {
        let ready = Rc::new(Cell::new(false));
        let ready_flag = Rc::clone(&ready);
        deck.reshuffle_async(
            Some(Box::new(move |_: &mut Deck| ready_flag.set(true))),
            None,
            false,
        )
        .expect("Failed to start reshuffle");

        let mut frames = 0;
        loop {
            frames += 1;
            match deck.update().expect("Reshuffle failed") {
                ReshuffleProgress::Completed { .. } | ReshuffleProgress::Idle => break,
                ReshuffleProgress::InProgress { .. } => {}
            }
        }
        assert!(ready.get());

        let Some(storylet) = deck.draw().expect("Failed to draw") else {
            println!("{:>2}. Nothing happens. ({} frames)", step, frames);
            continue;
        };
        // Tip the busker whenever there is money to spare.
        let outcome = if storylet.id() == "busker" { "tip" } else { "default" };
        deck.play(&storylet, outcome).expect("Failed to play");
        narrate(step, &storylet);
    }

    println!("\n=== Final context ===");
    println!("{}", dump_context(&context.borrow()));
}

fn narrate(step: usize, storylet: &Storylet) {
    let text = storylet
        .content
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("...");
    println!("{:>2}. {}", step, text);
}
