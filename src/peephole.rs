//! Generic peephole cleanup over recorded command sequences.
//!
//! Unlike [`crate::collapse_layers`] this pass removes commands: draws that
//! can never produce pixels, identity transforms, and `Save`/`SaveLayer`
//! brackets whose span contains no draw at all (the saved state is discarded
//! at the `Restore`, so clips and transforms inside a drawless span are dead
//! too). It shares the collapse pass's tolerance for malformed nesting.

use crate::model::{BlendMode, Command};

/// Counters from one [`strip_noops`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeepholeStats {
    pub original_count: usize,
    pub final_count: usize,
    pub invisible_draws_removed: usize,
    pub identity_concats_removed: usize,
    pub empty_scopes_removed: usize,
}

impl PeepholeStats {
    pub fn removed(&self) -> usize {
        self.original_count - self.final_count
    }
}

/// A draw that cannot change any pixel: fully transparent source-over with
/// no shader and no filters (filters could resurrect coverage or color).
fn is_invisible_draw(cmd: &Command) -> bool {
    match cmd.draw_paint() {
        Some(paint) => {
            paint.color.a == 0
                && paint.blend.is_src_over()
                && paint.shader.is_none()
                && paint.color_filter.is_none()
                && paint.image_filter.is_none()
                && paint.mask_filter.is_none()
        }
        None => false,
    }
}

/// An empty bracket opened by this command may be dropped outright. A plain
/// `Save` always can; a `SaveLayer` only when compositing a fully
/// transparent buffer is provably a no-op.
fn empty_scope_removable(cmd: &Command) -> bool {
    match cmd {
        Command::Save => true,
        Command::SaveLayer { paint: None, .. } => true,
        Command::SaveLayer {
            paint: Some(paint), ..
        } => paint.blend == BlendMode::SrcOver && paint.image_filter.is_none(),
        _ => false,
    }
}

/// Removes no-op commands in place and reports what was dropped.
#[tracing::instrument(skip(commands))]
pub fn strip_noops(commands: &mut Vec<Command>) -> PeepholeStats {
    let mut stats = PeepholeStats {
        original_count: commands.len(),
        ..PeepholeStats::default()
    };

    // Invisible draws and identity transforms first, so a bracket that only
    // contained them becomes empty for the scope sweep below.
    commands.retain(|cmd| {
        if is_invisible_draw(cmd) {
            stats.invisible_draws_removed += 1;
            return false;
        }
        if let Command::Concat { matrix } = cmd {
            if *matrix == crate::core::Affine::IDENTITY {
                stats.identity_concats_removed += 1;
                return false;
            }
        }
        true
    });

    // Drawless brackets. `keep` is a tombstone map so nested spans can be
    // marked while scanning left to right exactly once.
    let mut keep = vec![true; commands.len()];
    let mut stack: Vec<(usize, bool)> = Vec::new();

    for (i, cmd) in commands.iter().enumerate() {
        match cmd {
            Command::Save | Command::SaveLayer { .. } => stack.push((i, false)),
            Command::Restore => {
                let Some((open, saw_draw)) = stack.pop() else {
                    continue;
                };
                if !saw_draw && empty_scope_removable(&commands[open]) {
                    for slot in &mut keep[open..=i] {
                        *slot = false;
                    }
                    stats.empty_scopes_removed += 1;
                } else if let Some(parent) = stack.last_mut() {
                    // A surviving bracket counts as content for its parent.
                    parent.1 = true;
                }
            }
            _ => {
                if cmd.draw_paint().is_some() {
                    if let Some(top) = stack.last_mut() {
                        top.1 = true;
                    }
                }
            }
        }
    }

    let mut index = 0;
    commands.retain(|_| {
        let keep_it = keep[index];
        index += 1;
        keep_it
    });

    stats.final_count = commands.len();
    tracing::debug!(
        removed = stats.removed(),
        empty_scopes = stats.empty_scopes_removed,
        "peephole pass finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Affine, Rect, Rgba8};
    use crate::model::{ImageFilter, Paint};

    fn draw(paint: Paint) -> Command {
        Command::DrawRect {
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            paint,
        }
    }

    #[test]
    fn empty_save_restore_pair_is_removed() {
        let mut commands = vec![Command::Save, Command::Restore, draw(Paint::default())];
        let stats = strip_noops(&mut commands);

        assert_eq!(commands, vec![draw(Paint::default())]);
        assert_eq!(stats.empty_scopes_removed, 1);
        assert_eq!(stats.removed(), 2);
    }

    #[test]
    fn drawless_span_with_state_commands_is_dead() {
        let mut commands = vec![
            Command::Save,
            Command::Concat {
                matrix: Affine::scale(3.0),
            },
            Command::ClipRect {
                rect: Rect::new(0.0, 0.0, 4.0, 4.0),
            },
            Command::Restore,
        ];
        let stats = strip_noops(&mut commands);

        assert!(commands.is_empty());
        assert_eq!(stats.empty_scopes_removed, 1);
    }

    #[test]
    fn nested_empty_brackets_collapse_from_the_outside() {
        let mut commands = vec![
            Command::Save,
            Command::Save,
            Command::Restore,
            Command::Restore,
        ];
        let stats = strip_noops(&mut commands);

        assert!(commands.is_empty());
        // The inner bracket empties first; the outer span mark covers it.
        assert_eq!(stats.empty_scopes_removed, 2);
    }

    #[test]
    fn bracket_with_a_draw_survives() {
        let mut commands = vec![Command::Save, draw(Paint::default()), Command::Restore];
        let before = commands.clone();
        let stats = strip_noops(&mut commands);

        assert_eq!(commands, before);
        assert_eq!(stats.removed(), 0);
    }

    #[test]
    fn draw_in_inner_bracket_keeps_the_outer_one() {
        let mut commands = vec![
            Command::Save,
            Command::Save,
            draw(Paint::default()),
            Command::Restore,
            Command::Restore,
        ];
        let before = commands.clone();
        strip_noops(&mut commands);

        assert_eq!(commands, before);
    }

    #[test]
    fn invisible_draw_is_removed_and_can_empty_a_bracket() {
        let mut commands = vec![
            Command::Save,
            draw(Paint::solid(Rgba8::new(9, 9, 9, 0))),
            Command::Restore,
        ];
        let stats = strip_noops(&mut commands);

        assert!(commands.is_empty());
        assert_eq!(stats.invisible_draws_removed, 1);
        assert_eq!(stats.empty_scopes_removed, 1);
    }

    #[test]
    fn transparent_draw_with_image_filter_is_kept() {
        let paint = Paint {
            color: Rgba8::new(0, 0, 0, 0),
            image_filter: Some(ImageFilter::Blur { sigma: 1.0 }),
            ..Paint::default()
        };
        let mut commands = vec![draw(paint)];
        let before = commands.clone();
        strip_noops(&mut commands);

        assert_eq!(commands, before);
    }

    #[test]
    fn identity_concat_is_removed() {
        let mut commands = vec![
            Command::Concat {
                matrix: Affine::IDENTITY,
            },
            draw(Paint::default()),
        ];
        let stats = strip_noops(&mut commands);

        assert_eq!(commands, vec![draw(Paint::default())]);
        assert_eq!(stats.identity_concats_removed, 1);
    }

    #[test]
    fn empty_save_layer_with_image_filter_is_kept() {
        let paint = Paint {
            image_filter: Some(ImageFilter::Blur { sigma: 2.0 }),
            ..Paint::default()
        };
        let mut commands = vec![
            Command::SaveLayer {
                bounds: None,
                paint: Some(paint),
            },
            Command::Restore,
        ];
        let before = commands.clone();
        strip_noops(&mut commands);

        assert_eq!(commands, before);
    }

    #[test]
    fn unmatched_restore_is_tolerated() {
        let mut commands = vec![Command::Restore, draw(Paint::default())];
        let before = commands.clone();
        let stats = strip_noops(&mut commands);

        assert_eq!(commands, before);
        assert_eq!(stats.removed(), 0);
    }
}
