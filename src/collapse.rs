//! Collapses redundant compositing layers into plain state saves.
//!
//! A `SaveLayer`/`Restore` bracket allocates an offscreen buffer so its
//! contents can be blended onto the destination as a unit. When the layer's
//! paint and every draw inside it are equivalent to drawing directly (no
//! shader or filters, ordinary source-over, full alpha on the layer itself),
//! the buffer changes nothing: the opening command is rewritten to a plain
//! `Save`, eliminating the allocation while preserving transform/clip
//! semantics.
//!
//! The pass is a single left-to-right scan over the sequence with a stack of
//! per-scope frames, O(N) time and O(nesting depth) space. It rewrites in
//! place (never inserts or removes elements) so indices stay stable for the
//! whole scan, and it tolerates malformed nesting: an unmatched `Restore` is
//! skipped, unclosed scopes at the end are discarded without a rewrite.
//!
//! A draw only ever demotes the innermost open scope. A disqualifying draw
//! nested inside scope B therefore never demotes an enclosing scope A; A's
//! eligibility depends solely on its own paint and on commands seen while A
//! was innermost. This is the scan's defining simplification.

use crate::model::{Command, Paint};

/// Does this paint configuration contribute no visible compositing effect
/// beyond an ordinary opaque overwrite?
///
/// An absent paint is fully neutral. Any shader, color filter, image filter
/// or mask filter disqualifies outright: those can depend on the offscreen
/// buffer's isolation. Otherwise the blend mode must be plain source-over,
/// and when `require_opaque` is set (used for the layer's own paint) the
/// alpha must be full. Leaf draws inside a candidate scope are checked with
/// `require_opaque = false`: a partially transparent source-over draw
/// composites identically with or without the buffer.
pub fn paint_is_plain(paint: Option<&Paint>, require_opaque: bool) -> bool {
    let Some(paint) = paint else {
        return true;
    };

    if paint.shader.is_some()
        || paint.color_filter.is_some()
        || paint.image_filter.is_some()
        || paint.mask_filter.is_some()
    {
        return false;
    }

    (!require_opaque || paint.is_opaque()) && paint.blend.is_src_over()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MatchState {
    Matching,
    Ignore,
}

/// Frame for one currently-open scope. `Matching` only ever degrades to
/// `Ignore`, never back, and only while the frame is the innermost one.
#[derive(Clone, Copy, Debug)]
struct ScopeFrame {
    state: MatchState,
    origin: usize,
}

/// A `SaveLayer`/`Restore` pair rewritten by [`collapse_layers`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollapsedScope {
    /// Index of the rewritten opening command.
    pub open_index: usize,
    /// Index of the matching `Restore`.
    pub close_index: usize,
}

/// Structured record of what [`collapse_layers`] rewrote. Textual rendering
/// is a presentation concern; see [`CollapseLog::lines`].
#[derive(Clone, Debug, Default)]
pub struct CollapseLog {
    pub collapsed: Vec<CollapsedScope>,
}

impl CollapseLog {
    pub fn len(&self) -> usize {
        self.collapsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collapsed.is_empty()
    }

    /// Human-readable log lines for reports.
    pub fn lines(&self) -> Vec<String> {
        self.collapsed
            .iter()
            .map(|c| {
                format!(
                    "collapsed SaveLayer at {} (restore at {})",
                    c.open_index, c.close_index
                )
            })
            .collect()
    }
}

/// How the scan reacts to one command; computed before any rewrite so the
/// sequence can be mutated while iterating.
enum Step {
    OpenLayer { plain: bool },
    OpenSave,
    Close,
    Draw { plain: bool },
    Inert,
}

fn classify(cmd: &Command) -> Step {
    match cmd {
        Command::SaveLayer { paint, .. } => Step::OpenLayer {
            plain: paint_is_plain(paint.as_ref(), true),
        },
        Command::Save => Step::OpenSave,
        Command::Restore => Step::Close,
        _ => match cmd.draw_paint() {
            Some(paint) => Step::Draw {
                plain: paint_is_plain(Some(paint), false),
            },
            None => Step::Inert,
        },
    }
}

/// Rewrites collapsible `SaveLayer` commands to `Save` in place and returns
/// the structured log of rewritten pairs.
///
/// Deterministic: the output is a pure function of the input sequence. The
/// sequence length and the position of every command are preserved; only
/// opening commands ever change. Running the pass twice yields the same
/// result as running it once (a collapsed `Save` is never re-classified).
#[tracing::instrument(skip(commands))]
pub fn collapse_layers(commands: &mut [Command]) -> CollapseLog {
    let mut stack: Vec<ScopeFrame> = Vec::new();
    let mut log = CollapseLog::default();

    for i in 0..commands.len() {
        match classify(&commands[i]) {
            Step::OpenLayer { plain } => {
                let state = if plain {
                    MatchState::Matching
                } else {
                    MatchState::Ignore
                };
                stack.push(ScopeFrame { state, origin: i });
            }
            Step::OpenSave => {
                stack.push(ScopeFrame {
                    state: MatchState::Ignore,
                    origin: i,
                });
            }
            Step::Draw { plain } => {
                if let Some(top) = stack.last_mut() {
                    if top.state == MatchState::Matching && !plain {
                        top.state = MatchState::Ignore;
                    }
                }
            }
            Step::Close => {
                // Unmatched restore: tolerated, not fatal.
                let Some(frame) = stack.pop() else {
                    continue;
                };
                if frame.state == MatchState::Matching {
                    tracing::debug!(open = frame.origin, close = i, "collapsing save layer");
                    commands[frame.origin] = Command::Save;
                    log.collapsed.push(CollapsedScope {
                        open_index: frame.origin,
                        close_index: i,
                    });
                }
            }
            Step::Inert => {}
        }
    }

    log
}
