/// The storylet deck: reshuffle → draw → play orchestration.
///
/// Wires together cooldown checks, host filters, condition evaluation,
/// priority bucketing, and per-bucket shuffling. Reshuffles run either in
/// one call or incrementally across `update()` ticks.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::context::{update_context, Context, ContextError, SharedContext};
use crate::core::expression::EvalError;
use crate::schema::storylet::Storylet;

/// Outcome applied by [`Deck::play_default`] and the draw-and-play helpers
/// when the caller does not name one.
pub const DEFAULT_OUTCOME: &str = "default";

const DEFAULT_ASYNC_CHUNK_SIZE: usize = 10;

static NEXT_DECK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum DeckError {
    #[error("storylet with id '{0}' already exists in the deck")]
    DuplicateId(String),
    #[error("async reshuffle in progress, can't call {operation}()")]
    IllegalState { operation: &'static str },
    #[error("storylet '{0}' has not been added to this deck")]
    NotAttached(String),
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
    #[error("context error: {0}")]
    Context(#[from] ContextError),
}

/// Host predicate that can exclude storylets from a reshuffle.
pub type Filter = Box<dyn Fn(&Storylet) -> bool>;

/// Fired once when an async reshuffle finishes, with the pile ready to draw.
pub type ReshuffleCallback = Box<dyn FnOnce(&mut Deck)>;

/// What a call to [`Deck::update`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReshuffleProgress {
    /// No async reshuffle was running.
    Idle,
    /// Classified one chunk; this many storylets are still queued.
    InProgress { remaining: usize },
    /// The pile has been rebuilt and the callback has fired. Carries the
    /// evaluation trace if one was requested.
    Completed { trace: Option<Vec<String>> },
}

/// In-flight reshuffle: storylets still to classify and the priority
/// buckets built so far.
struct ReshuffleState {
    queue: VecDeque<Rc<Storylet>>,
    buckets: BTreeMap<i64, Vec<Rc<Storylet>>>,
    filter: Option<Filter>,
    on_complete: Option<ReshuffleCallback>,
    trace: Option<Vec<String>>,
}

/// Classification settings captured from the deck for one chunk.
struct Classifier<'a> {
    ctx: &'a Context,
    counter: u64,
    use_specificity: bool,
    filter: Option<&'a dyn Fn(&Storylet) -> bool>,
}

impl Classifier<'_> {
    /// Pop up to `count` storylets off `queue` and drop each eligible one
    /// into its priority bucket.
    fn run(
        &self,
        queue: &mut VecDeque<Rc<Storylet>>,
        buckets: &mut BTreeMap<i64, Vec<Rc<Storylet>>>,
        count: usize,
        mut eval_trace: Option<&mut Vec<String>>,
    ) -> Result<(), EvalError> {
        for _ in 0..count {
            let Some(storylet) = queue.pop_front() else {
                break;
            };

            if !storylet.can_draw(self.counter) {
                trace!(id = storylet.id(), "skipped: cooling down");
                continue;
            }
            if let Some(filter) = self.filter {
                if !filter(&*storylet) {
                    trace!(id = storylet.id(), "skipped: filtered out");
                    continue;
                }
            }
            if !storylet.check_condition(self.ctx, eval_trace.as_deref_mut())? {
                trace!(id = storylet.id(), "skipped: condition false");
                continue;
            }

            let priority = storylet.calc_current_priority(
                self.ctx,
                self.use_specificity,
                eval_trace.as_deref_mut(),
            )?;
            trace!(id = storylet.id(), priority, "classified");
            buckets.entry(priority).or_default().push(storylet);
        }
        Ok(())
    }
}

/// A set of storylets sharing one context, and the draw pile built from
/// them. Built via `Deck::builder()`.
pub struct Deck {
    id: u64,
    context: SharedContext,
    storylets: Vec<Rc<Storylet>>,
    index: FxHashMap<String, usize>,
    draw_pile: VecDeque<Rc<Storylet>>,
    /// Number of plays since creation or the last `reset()`.
    counter: u64,
    rng: StdRng,
    reshuffle: Option<ReshuffleState>,
    use_specificity: bool,
    async_chunk_size: usize,
}

/// Builder for constructing a `Deck`.
pub struct DeckBuilder {
    context: Option<SharedContext>,
    seed: Option<u64>,
    use_specificity: bool,
    async_chunk_size: usize,
}

impl DeckBuilder {
    /// Share an existing context. Without one the deck gets a fresh, empty
    /// context.
    pub fn context(mut self, context: SharedContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Seed the shuffle for reproducible piles.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Rank more specific conditions ahead of less specific ones at equal
    /// declared priority.
    pub fn use_specificity(mut self, enabled: bool) -> Self {
        self.use_specificity = enabled;
        self
    }

    /// Storylets classified per `update()` tick during an async reshuffle.
    pub fn async_chunk_size(mut self, size: usize) -> Self {
        self.async_chunk_size = size.max(1);
        self
    }

    pub fn build(self) -> Deck {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Deck {
            id: NEXT_DECK_ID.fetch_add(1, Ordering::Relaxed),
            context: self.context.unwrap_or_default(),
            storylets: Vec::new(),
            index: FxHashMap::default(),
            draw_pile: VecDeque::new(),
            counter: 0,
            rng,
            reshuffle: None,
            use_specificity: self.use_specificity,
            async_chunk_size: self.async_chunk_size,
        }
    }
}

impl Deck {
    pub fn builder() -> DeckBuilder {
        DeckBuilder {
            context: None,
            seed: None,
            use_specificity: false,
            async_chunk_size: DEFAULT_ASYNC_CHUNK_SIZE,
        }
    }

    pub fn new(context: SharedContext) -> Self {
        Self::builder().context(context).build()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn use_specificity(&self) -> bool {
        self.use_specificity
    }

    pub fn set_use_specificity(&mut self, enabled: bool) {
        self.use_specificity = enabled;
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn len(&self) -> usize {
        self.storylets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storylets.is_empty()
    }

    /// All storylets, in the order they were added.
    pub fn storylets(&self) -> impl Iterator<Item = &Rc<Storylet>> {
        self.storylets.iter()
    }

    pub fn get_storylet(&self, id: &str) -> Option<Rc<Storylet>> {
        self.index.get(id).map(|&i| Rc::clone(&self.storylets[i]))
    }

    /// Take ownership of `storylet` and attach it to this deck.
    pub fn add_storylet(&mut self, storylet: Storylet) -> Result<Rc<Storylet>, DeckError> {
        if self.index.contains_key(storylet.id()) {
            return Err(DeckError::DuplicateId(storylet.id().to_string()));
        }
        storylet.attach(self.id);
        let storylet = Rc::new(storylet);
        self.index
            .insert(storylet.id().to_string(), self.storylets.len());
        self.storylets.push(Rc::clone(&storylet));
        Ok(storylet)
    }

    /// Zero the play counter and make every storylet eligible again.
    /// The current draw pile is left as is.
    pub fn reset(&mut self) {
        self.counter = 0;
        for storylet in &self.storylets {
            storylet.reset();
        }
    }

    pub fn is_reshuffling(&self) -> bool {
        self.reshuffle.is_some()
    }

    /// True only for the deck's own instance; a clone with the same id is
    /// not a member.
    fn holds(&self, storylet: &Storylet) -> bool {
        self.index
            .get(storylet.id())
            .is_some_and(|&i| std::ptr::eq(Rc::as_ptr(&self.storylets[i]), storylet))
    }

    fn ensure_idle(&self, operation: &'static str) -> Result<(), DeckError> {
        if self.is_reshuffling() {
            return Err(DeckError::IllegalState { operation });
        }
        Ok(())
    }

    fn classifier<'a>(
        &self,
        ctx: &'a Context,
        filter: Option<&'a dyn Fn(&Storylet) -> bool>,
    ) -> Classifier<'a> {
        Classifier {
            ctx,
            counter: self.counter,
            use_specificity: self.use_specificity,
            filter,
        }
    }

    /// Rebuild the draw pile: every storylet that is off cooldown, passes
    /// `filter`, and whose condition holds, ordered by descending priority
    /// and shuffled within each priority.
    ///
    /// On an evaluation error the previous pile is kept.
    pub fn reshuffle(
        &mut self,
        filter: Option<&dyn Fn(&Storylet) -> bool>,
        eval_trace: Option<&mut Vec<String>>,
    ) -> Result<(), DeckError> {
        self.ensure_idle("reshuffle")?;
        debug!(deck = self.id, storylets = self.storylets.len(), "reshuffle");

        let mut queue: VecDeque<Rc<Storylet>> = self.storylets.iter().cloned().collect();
        let mut buckets = BTreeMap::new();
        {
            let ctx = self.context.borrow();
            let classifier = self.classifier(&ctx, filter);
            classifier.run(&mut queue, &mut buckets, usize::MAX, eval_trace)?;
        }
        self.finalize(buckets);
        Ok(())
    }

    /// Start a reshuffle that classifies `async_chunk_size` storylets per
    /// `update()` call. Until it completes, drawing, playing, reshuffling,
    /// and inspecting the pile fail with `IllegalState`. There is no cancel.
    pub fn reshuffle_async(
        &mut self,
        on_complete: Option<ReshuffleCallback>,
        filter: Option<Filter>,
        collect_trace: bool,
    ) -> Result<(), DeckError> {
        self.ensure_idle("reshuffle_async")?;
        debug!(
            deck = self.id,
            storylets = self.storylets.len(),
            chunk = self.async_chunk_size,
            "async reshuffle started"
        );

        self.reshuffle = Some(ReshuffleState {
            queue: self.storylets.iter().cloned().collect(),
            buckets: BTreeMap::new(),
            filter,
            on_complete,
            trace: collect_trace.then(Vec::new),
        });
        Ok(())
    }

    /// Advance an async reshuffle by one chunk. When the queue runs dry the
    /// pile is rebuilt and the completion callback fires.
    ///
    /// An evaluation error abandons the reshuffle: the previous pile is
    /// kept and the callback never fires.
    pub fn update(&mut self) -> Result<ReshuffleProgress, DeckError> {
        let Some(mut state) = self.reshuffle.take() else {
            return Ok(ReshuffleProgress::Idle);
        };

        {
            let ctx = self.context.borrow();
            let classifier = self.classifier(&ctx, state.filter.as_deref());
            classifier.run(
                &mut state.queue,
                &mut state.buckets,
                self.async_chunk_size,
                state.trace.as_mut(),
            )?;
        }

        if !state.queue.is_empty() {
            let remaining = state.queue.len();
            self.reshuffle = Some(state);
            return Ok(ReshuffleProgress::InProgress { remaining });
        }

        self.finalize(state.buckets);
        debug!(deck = self.id, pile = self.draw_pile.len(), "async reshuffle complete");
        if let Some(on_complete) = state.on_complete {
            on_complete(self);
        }
        Ok(ReshuffleProgress::Completed { trace: state.trace })
    }

    fn finalize(&mut self, buckets: BTreeMap<i64, Vec<Rc<Storylet>>>) {
        self.draw_pile.clear();
        for (_, mut bucket) in buckets.into_iter().rev() {
            bucket.shuffle(&mut self.rng);
            self.draw_pile.extend(bucket);
        }
        debug!(deck = self.id, pile = self.draw_pile.len(), "draw pile rebuilt");
    }

    /// Take the next storylet off the pile. Drawing does not consume it;
    /// cooldowns only advance on [`play`](Self::play).
    pub fn draw(&mut self) -> Result<Option<Rc<Storylet>>, DeckError> {
        self.ensure_idle("draw")?;
        Ok(self.draw_pile.pop_front())
    }

    /// Consume `storylet`: apply the context updates of `outcome` (if the
    /// storylet defines it), then advance the play counter and the
    /// storylet's cooldown.
    ///
    /// Updates within the outcome are applied in order and not rolled back:
    /// if one fails, the earlier ones stay applied and the counter and
    /// cooldown are left untouched.
    pub fn play(&mut self, storylet: &Storylet, outcome: &str) -> Result<(), DeckError> {
        self.ensure_idle("play")?;
        if !self.holds(storylet) {
            return Err(DeckError::NotAttached(storylet.id().to_string()));
        }

        if let Some(updates) = storylet.outcome(outcome) {
            let mut ctx = self.context.borrow_mut();
            update_context(&mut ctx, updates, None)?;
        }

        self.counter += 1;
        storylet.on_consumed(self.counter);
        debug!(deck = self.id, id = storylet.id(), outcome, counter = self.counter, "played");
        Ok(())
    }

    pub fn play_default(&mut self, storylet: &Storylet) -> Result<(), DeckError> {
        self.play(storylet, DEFAULT_OUTCOME)
    }

    /// Reshuffle, then draw and play up to `count` storylets. Returns fewer
    /// when the pile runs out.
    pub fn draw_and_play(
        &mut self,
        count: usize,
        filter: Option<&dyn Fn(&Storylet) -> bool>,
        outcome: Option<&str>,
    ) -> Result<Vec<Rc<Storylet>>, DeckError> {
        self.reshuffle(filter, None)?;
        let outcome = outcome.unwrap_or(DEFAULT_OUTCOME);

        let mut played = Vec::new();
        for _ in 0..count {
            let Some(storylet) = self.draw()? else {
                break;
            };
            self.play(&storylet, outcome)?;
            played.push(storylet);
        }
        Ok(played)
    }

    pub fn draw_and_play_single(
        &mut self,
        filter: Option<&dyn Fn(&Storylet) -> bool>,
        outcome: Option<&str>,
    ) -> Result<Option<Rc<Storylet>>, DeckError> {
        Ok(self.draw_and_play(1, filter, outcome)?.pop())
    }

    /// Draw up to `count` storylets without playing them. With
    /// `reshuffle_if_needed`, an empty pile is rebuilt and drawing goes on;
    /// otherwise the hand stops short.
    pub fn draw_hand(
        &mut self,
        count: usize,
        reshuffle_if_needed: bool,
    ) -> Result<Vec<Rc<Storylet>>, DeckError> {
        self.ensure_idle("draw_hand")?;
        let mut hand = Vec::new();
        for _ in 0..count {
            if self.draw_pile.is_empty() {
                if !reshuffle_if_needed {
                    break;
                }
                self.reshuffle(None, None)?;
            }
            let Some(storylet) = self.draw()? else {
                break;
            };
            hand.push(storylet);
        }
        Ok(hand)
    }

    pub fn draw_pile_len(&self) -> Result<usize, DeckError> {
        self.ensure_idle("draw_pile_len")?;
        Ok(self.draw_pile.len())
    }

    /// Comma-separated ids of the pile, front first.
    pub fn dump_draw_pile(&self) -> Result<String, DeckError> {
        self.ensure_idle("dump_draw_pile")?;
        Ok(self
            .draw_pile
            .iter()
            .map(|s| s.id())
            .collect::<Vec<_>>()
            .join(","))
    }
}
