//! Grid pathfinding over a single terrain type using A*.
//!
//! Used by boat attacks (water routes) and by the client-side worker for
//! path queries. Ordering of equal-cost nodes is fixed so every client finds
//! the same route.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{GameError, Result};
use crate::terrain::{Cell, Terrain, TerrainMap};

/// A node in the A* open set.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    index: usize,
    f_score: u32,
    /// Lower row-major index wins ties.
    tie_breaker: usize,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behaviour.
        match other.f_score.cmp(&self.f_score) {
            Ordering::Equal => other.tie_breaker.cmp(&self.tie_breaker),
            ord => ord,
        }
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[inline]
fn manhattan(a: Cell, b: Cell) -> u32 {
    a.x.abs_diff(b.x) + a.y.abs_diff(b.y)
}

/// Find a 4-connected path from `start` to `goal` that only crosses tiles of
/// terrain `over`. The returned path includes both endpoints.
///
/// # Errors
///
/// Returns `GameError::InvalidState` if either endpoint is off the map or not
/// of terrain `over`, or if no path exists.
pub fn find_path(map: &TerrainMap, start: Cell, goal: Cell, over: Terrain) -> Result<Vec<Cell>> {
    let start_index = map
        .index(start)
        .ok_or_else(|| GameError::InvalidState(format!("Start {start:?} outside map")))?;
    let goal_index = map
        .index(goal)
        .ok_or_else(|| GameError::InvalidState(format!("Goal {goal:?} outside map")))?;

    if map.terrain_at(start_index) != over {
        return Err(GameError::InvalidState(format!(
            "Start {start:?} is not {over:?}"
        )));
    }
    if map.terrain_at(goal_index) != over {
        return Err(GameError::InvalidState(format!(
            "Goal {goal:?} is not {over:?}"
        )));
    }

    if start_index == goal_index {
        return Ok(vec![start]);
    }

    let mut open_set = BinaryHeap::new();
    let mut came_from: HashMap<usize, usize> = HashMap::new();
    let mut g_score: HashMap<usize, u32> = HashMap::new();

    g_score.insert(start_index, 0);
    open_set.push(AStarNode {
        index: start_index,
        f_score: manhattan(start, goal),
        tie_breaker: start_index,
    });

    while let Some(current) = open_set.pop() {
        if current.index == goal_index {
            return Ok(reconstruct_path(map, &came_from, goal_index));
        }

        let current_g = g_score.get(&current.index).copied().unwrap_or(u32::MAX);

        for neighbour in map.neighbours(current.index) {
            if map.terrain_at(neighbour) != over {
                continue;
            }

            let tentative_g = current_g.saturating_add(1);
            if tentative_g < g_score.get(&neighbour).copied().unwrap_or(u32::MAX) {
                came_from.insert(neighbour, current.index);
                g_score.insert(neighbour, tentative_g);
                open_set.push(AStarNode {
                    index: neighbour,
                    f_score: tentative_g + manhattan(map.cell(neighbour), goal),
                    tie_breaker: neighbour,
                });
            }
        }
    }

    Err(GameError::InvalidState(format!(
        "No {over:?} path from {start:?} to {goal:?}"
    )))
}

fn reconstruct_path(map: &TerrainMap, came_from: &HashMap<usize, usize>, goal: usize) -> Vec<Cell> {
    let mut path = vec![map.cell(goal)];
    let mut current = goal;
    while let Some(&prev) = came_from.get(&current) {
        path.push(map.cell(prev));
        current = prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water_map(width: u32, height: u32) -> TerrainMap {
        let mut map = TerrainMap::new(width, height);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                map.set_terrain(Cell::new(x, y), Terrain::Water);
            }
        }
        map
    }

    #[test]
    fn test_straight_path() {
        let map = TerrainMap::new(10, 10);
        let path = find_path(&map, Cell::new(0, 0), Cell::new(5, 0), Terrain::Land).unwrap();
        assert_eq!(path.first(), Some(&Cell::new(0, 0)));
        assert_eq!(path.last(), Some(&Cell::new(5, 0)));
        assert_eq!(path.len(), 6);
    }

    #[test]
    fn test_path_around_obstacle() {
        let mut map = water_map(7, 7);
        // Land wall at x = 3 with a gap at y = 6.
        for y in 0..6 {
            map.set_terrain(Cell::new(3, y), Terrain::Land);
        }
        let path = find_path(&map, Cell::new(0, 0), Cell::new(6, 0), Terrain::Water).unwrap();
        assert!(path.contains(&Cell::new(3, 6)));
        assert!(path.iter().all(|c| map.terrain(*c) == Some(Terrain::Water)));
    }

    #[test]
    fn test_no_path() {
        let mut map = water_map(5, 5);
        for y in 0..5 {
            map.set_terrain(Cell::new(2, y), Terrain::Land);
        }
        assert!(find_path(&map, Cell::new(0, 0), Cell::new(4, 4), Terrain::Water).is_err());
    }

    #[test]
    fn test_wrong_terrain_endpoint() {
        let map = TerrainMap::new(4, 4);
        assert!(find_path(&map, Cell::new(0, 0), Cell::new(3, 3), Terrain::Water).is_err());
        assert!(find_path(&map, Cell::new(0, 0), Cell::new(9, 9), Terrain::Land).is_err());
    }

    #[test]
    fn test_same_start_goal() {
        let map = TerrainMap::new(4, 4);
        let path = find_path(&map, Cell::new(1, 1), Cell::new(1, 1), Terrain::Land).unwrap();
        assert_eq!(path, vec![Cell::new(1, 1)]);
    }

    #[test]
    fn test_path_deterministic() {
        let map = TerrainMap::new(12, 12);
        let a = find_path(&map, Cell::new(0, 0), Cell::new(11, 11), Terrain::Land).unwrap();
        let b = find_path(&map, Cell::new(0, 0), Cell::new(11, 11), Terrain::Land).unwrap();
        assert_eq!(a, b);
    }
}
