use tracing::debug;

use crate::{
    algorithms::{
        simplification::simplify_path,
        skeleton::{foreground_count, transitions},
    },
    config::CenterlineConfig,
    types::{BinaryMask, Polyline, Segment},
};

/// Ordered run of skeleton pixels between two nodes, or around a loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelChain {
    pub pixels: Vec<(u32, u32)>,
    pub closed: bool,
}

/// Vectorized centerlines: two-vertex chains become segments, longer ones polylines
#[derive(Debug, Clone, Default)]
pub struct CenterlineOutput {
    pub segments: Vec<Segment>,
    pub polylines: Vec<Polyline>,
}

/// Follows one-pixel-wide skeletons into chains and simplifies them.
#[derive(Debug, Clone)]
pub struct CenterlineTracer {
    pub simplify_epsilon: f64,
    pub min_chain_pixels: usize,
}

impl Default for CenterlineTracer {
    fn default() -> Self {
        Self::from_config(&CenterlineConfig::default())
    }
}

// 4-neighbours first so staircases are walked pixel by pixel
const STEPS: [(i64, i64); 8] = [
    (0, -1),
    (1, 0),
    (0, 1),
    (-1, 0),
    (1, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
];

struct ChainWalker<'a> {
    mask: &'a BinaryMask,
    width: usize,
    is_node: Vec<bool>,
    visited: Vec<bool>,
}

impl<'a> ChainWalker<'a> {
    fn new(mask: &'a BinaryMask) -> Self {
        let width = mask.width() as usize;
        let mut is_node = vec![false; mask.data().len()];
        for (x, y) in mask.foreground() {
            let n = ring(mask, x as i64, y as i64);
            let count = foreground_count(&n);
            // Endpoints, isolated pixels and true junctions. Staircase corners
            // have three neighbours but only two crossings, so they stay path pixels.
            is_node[y as usize * width + x as usize] = count <= 1 || transitions(&n) >= 3;
        }
        Self {
            mask,
            width,
            is_node,
            visited: vec![false; mask.data().len()],
        }
    }

    fn index(&self, (x, y): (u32, u32)) -> usize {
        y as usize * self.width + x as usize
    }

    fn neighbours(&self, (x, y): (u32, u32)) -> impl Iterator<Item = (u32, u32)> + '_ {
        STEPS.iter().filter_map(move |&(dx, dy)| {
            let (nx, ny) = (x as i64 + dx, y as i64 + dy);
            self.mask
                .get_signed(nx, ny)
                .then_some((nx as u32, ny as u32))
        })
    }

    fn adjacent(a: (u32, u32), b: (u32, u32)) -> bool {
        a != b && a.0.abs_diff(b.0) <= 1 && a.1.abs_diff(b.1) <= 1
    }

    /// Walk from `start` through `first` until a node or a dead end
    fn walk(&mut self, start: (u32, u32), first: (u32, u32)) -> Vec<(u32, u32)> {
        let mut chain = vec![start, first];
        if self.is_node[self.index(first)] {
            return chain;
        }
        let first_idx = self.index(first);
        self.visited[first_idx] = true;

        let (mut prev, mut cur) = (start, first);
        loop {
            let mut path_step = None;
            let mut node_step = None;
            for nb in self.neighbours(cur) {
                if nb == prev {
                    continue;
                }
                let idx = self.index(nb);
                if self.is_node[idx] {
                    // Returning to the start node needs a real loop, not a corner cut
                    if node_step.is_none() && (nb != start || chain.len() >= 4) {
                        node_step = Some(nb);
                    }
                } else if path_step.is_none() && !self.visited[idx] {
                    path_step = Some(nb);
                }
            }

            match node_step.or(path_step) {
                Some(next) => {
                    chain.push(next);
                    let idx = self.index(next);
                    if self.is_node[idx] {
                        break;
                    }
                    self.visited[idx] = true;
                    prev = cur;
                    cur = next;
                }
                None => break,
            }
        }
        chain
    }

    fn chains(mut self) -> Vec<PixelChain> {
        let mut chains = Vec::new();
        let pixels: Vec<(u32, u32)> = self.mask.foreground().collect();

        let nodes: Vec<(u32, u32)> = pixels
            .iter()
            .copied()
            .filter(|&p| self.is_node[self.index(p)])
            .collect();

        // Open chains hanging off endpoints and junctions
        for node in nodes {
            let starts: Vec<(u32, u32)> = self.neighbours(node).collect();
            for first in starts {
                let idx = self.index(first);
                if self.is_node[idx] {
                    // Adjacent nodes: keep the pair once
                    if self.index(node) < idx {
                        chains.push(PixelChain {
                            pixels: vec![node, first],
                            closed: false,
                        });
                    }
                    continue;
                }
                if self.visited[idx] {
                    continue;
                }
                chains.push(PixelChain {
                    pixels: self.walk(node, first),
                    closed: false,
                });
            }
        }

        // Whatever is left contains no node: loops, or hooks around a path pixel
        for &seed in &pixels {
            let seed_idx = self.index(seed);
            if self.is_node[seed_idx] || self.visited[seed_idx] {
                continue;
            }
            self.visited[seed_idx] = true;
            let free: Vec<(u32, u32)> = self
                .neighbours(seed)
                .filter(|&nb| !self.visited[self.index(nb)])
                .collect();
            let Some(&first) = free.first() else {
                continue;
            };

            let forward = self.walk(seed, first);
            let tail = forward[forward.len() - 1];
            if forward.len() >= 4 && Self::adjacent(tail, seed) {
                chains.push(PixelChain {
                    pixels: forward,
                    closed: true,
                });
                continue;
            }

            let second = free
                .iter()
                .copied()
                .find(|&nb| !self.visited[self.index(nb)]);
            let mut pixels = match second {
                Some(second) => {
                    let mut backward = self.walk(seed, second);
                    backward.reverse();
                    backward.pop();
                    backward
                }
                None => Vec::new(),
            };
            pixels.extend(forward);
            chains.push(PixelChain {
                pixels,
                closed: false,
            });
        }

        chains
    }
}

fn ring(mask: &BinaryMask, x: i64, y: i64) -> [u8; 8] {
    // Same order as the thinning neighbourhood: N, NE, E, SE, S, SW, W, NW
    [
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
        (-1, -1),
    ]
    .map(|(dx, dy)| u8::from(mask.get_signed(x + dx, y + dy)))
}

impl CenterlineTracer {
    pub fn from_config(config: &CenterlineConfig) -> Self {
        Self {
            simplify_epsilon: config.simplify_epsilon,
            min_chain_pixels: config.min_chain_pixels,
        }
    }

    /// Split a skeleton into pixel chains at endpoints and junctions
    pub fn trace_chains(&self, skeleton: &BinaryMask) -> Vec<PixelChain> {
        ChainWalker::new(skeleton).chains()
    }

    pub fn trace(&self, skeleton: &BinaryMask) -> CenterlineOutput {
        let chains = self.trace_chains(skeleton);
        let mut output = CenterlineOutput::default();

        for chain in &chains {
            if chain.pixels.len() < self.min_chain_pixels {
                continue;
            }
            let points: Vec<[f64; 2]> = chain
                .pixels
                .iter()
                .map(|&(x, y)| [x as f64, y as f64])
                .collect();
            let vertices = simplify_path(&points, self.simplify_epsilon, chain.closed);

            match (chain.closed, vertices.len()) {
                (false, 2) => {
                    let segment = Segment {
                        start: vertices[0],
                        end: vertices[1],
                    };
                    if !segment.is_degenerate() {
                        output.segments.push(segment);
                    }
                }
                (false, n) if n > 2 => output.polylines.push(Polyline {
                    points: vertices,
                    closed: false,
                }),
                (true, n) if n >= 3 => output.polylines.push(Polyline {
                    points: vertices,
                    closed: true,
                }),
                _ => {}
            }
        }

        debug!(
            "Traced {} chains into {} segments and {} polylines",
            chains.len(),
            output.segments.len(),
            output.polylines.len()
        );
        output
    }
}
