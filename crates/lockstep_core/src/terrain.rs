//! Tile grid the simulation plays on.
//!
//! Maps are generated from a seed so that every client derives the identical
//! grid without shipping it over the wire.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::rng::SeededRng;

/// Terrain of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Terrain {
    /// Claimable ground.
    #[default]
    Land,
    /// Crossable only by boat.
    Water,
}

/// Integer tile coordinate as it appears in intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Cell {
    /// Create a cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Build a cell from a pair of nullable wire coordinates.
    #[must_use]
    pub fn from_optional(x: Option<i32>, y: Option<i32>) -> Option<Self> {
        Some(Self::new(x?, y?))
    }
}

/// Parameters that fully determine a generated map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MapParams {
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// Generator seed.
    pub seed: u64,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            seed: 0,
        }
    }
}

impl MapParams {
    /// Check the dimensions before anything is generated from them.
    ///
    /// # Errors
    /// Returns [`GameError::InvalidState`] if a side is zero or larger than
    /// [`MAX_MAP_DIMENSION`].
    pub fn validate(&self) -> Result<()> {
        for (name, side) in [("width", self.width), ("height", self.height)] {
            if side == 0 || side > MAX_MAP_DIMENSION {
                return Err(GameError::InvalidState(format!(
                    "Map {name} must be between 1 and {MAX_MAP_DIMENSION}, got {side}"
                )));
            }
        }
        Ok(())
    }
}

/// Largest accepted map side, in tiles.
pub const MAX_MAP_DIMENSION: u32 = 4096;

/// 4-neighbourhood offsets in a fixed order.
const NEIGHBOURS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Row-major tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerrainMap {
    width: u32,
    height: u32,
    tiles: Vec<Terrain>,
}

impl TerrainMap {
    /// Create an all-land map.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero or does not fit an `i32` coordinate.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0, "TerrainMap width must be positive");
        assert!(height > 0, "TerrainMap height must be positive");
        assert!(
            i32::try_from(width).is_ok() && i32::try_from(height).is_ok(),
            "TerrainMap dimensions must fit i32 coordinates"
        );

        Self {
            width,
            height,
            tiles: vec![Terrain::Land; (width as usize) * (height as usize)],
        }
    }

    /// [`generate`](Self::generate) for parameters read from a file or the
    /// network.
    ///
    /// # Errors
    /// Returns an error if [`MapParams::validate`] rejects the dimensions.
    pub fn try_generate(params: MapParams) -> Result<Self> {
        params.validate()?;
        Ok(Self::generate(params))
    }

    /// Generate a map from its parameters.
    ///
    /// The outer ring is ocean and a seeded number of circular lakes are cut
    /// into the interior. Identical parameters always produce identical maps.
    ///
    /// # Panics
    ///
    /// Panics on dimensions [`MapParams::validate`] would reject.
    #[must_use]
    pub fn generate(params: MapParams) -> Self {
        let mut map = Self::new(params.width, params.height);
        let (w, h) = (map.width_i32(), map.height_i32());

        for y in 0..h {
            for x in 0..w {
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    map.set_terrain(Cell::new(x, y), Terrain::Water);
                }
            }
        }

        if w < 8 || h < 8 {
            return map;
        }

        let mut rng = SeededRng::new(params.seed);
        let area = (params.width as usize) * (params.height as usize);
        let lakes = 1 + area / 512;
        for _ in 0..lakes {
            let cx = rng.next_range(2, w - 2);
            let cy = rng.next_range(2, h - 2);
            let radius = rng.next_range(1, (w.min(h) / 10).max(1) + 1);
            for y in (cy - radius)..=(cy + radius) {
                for x in (cx - radius)..=(cx + radius) {
                    let (dx, dy) = (x - cx, y - cy);
                    if dx * dx + dy * dy <= radius * radius {
                        map.set_terrain(Cell::new(x, y), Terrain::Water);
                    }
                }
            }
        }
        map
    }

    /// Width in tiles.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in tiles.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Total tile count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Maps always hold at least one tile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn width_i32(&self) -> i32 {
        self.width as i32
    }

    #[allow(clippy::cast_possible_wrap)]
    fn height_i32(&self) -> i32 {
        self.height as i32
    }

    /// True if the coordinate lies on the map.
    #[must_use]
    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width_i32() && cell.y < self.height_i32()
    }

    /// Row-major index of a coordinate, or `None` off the map.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn index(&self, cell: Cell) -> Option<usize> {
        self.in_bounds(cell)
            .then(|| (cell.y as usize) * (self.width as usize) + (cell.x as usize))
    }

    /// Coordinate of a row-major index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn cell(&self, index: usize) -> Cell {
        let w = self.width as usize;
        Cell::new((index % w) as i32, (index / w) as i32)
    }

    /// Terrain at a coordinate.
    #[must_use]
    pub fn terrain(&self, cell: Cell) -> Option<Terrain> {
        self.index(cell).map(|i| self.tiles[i])
    }

    /// Terrain at a row-major index.
    #[must_use]
    pub fn terrain_at(&self, index: usize) -> Terrain {
        self.tiles[index]
    }

    /// Overwrite the terrain at a coordinate. Returns `false` off the map.
    pub fn set_terrain(&mut self, cell: Cell, terrain: Terrain) -> bool {
        match self.index(cell) {
            Some(i) => {
                self.tiles[i] = terrain;
                true
            }
            None => false,
        }
    }

    /// True if the coordinate is land.
    #[must_use]
    pub fn is_land(&self, cell: Cell) -> bool {
        self.terrain(cell) == Some(Terrain::Land)
    }

    /// Number of land tiles.
    #[must_use]
    pub fn land_count(&self) -> usize {
        self.tiles.iter().filter(|t| **t == Terrain::Land).count()
    }

    /// Row-major indices of all land tiles.
    pub fn land_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Terrain::Land)
            .map(|(i, _)| i)
    }

    /// In-bounds 4-neighbours of an index, in a fixed order.
    pub fn neighbours(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let origin = self.cell(index);
        NEIGHBOURS
            .iter()
            .filter_map(move |(dx, dy)| self.index(Cell::new(origin.x + dx, origin.y + dy)))
    }

    /// True if a land tile touches water.
    #[must_use]
    pub fn is_shore(&self, index: usize) -> bool {
        self.tiles[index] == Terrain::Land
            && self
                .neighbours(index)
                .any(|n| self.tiles[n] == Terrain::Water)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        let map = TerrainMap::new(10, 7);
        let cell = Cell::new(3, 5);
        let index = map.index(cell).unwrap();
        assert_eq!(index, 53);
        assert_eq!(map.cell(index), cell);
    }

    #[test]
    fn test_out_of_bounds() {
        let map = TerrainMap::new(4, 4);
        assert_eq!(map.index(Cell::new(-1, 0)), None);
        assert_eq!(map.index(Cell::new(4, 0)), None);
        assert_eq!(map.terrain(Cell::new(0, 4)), None);
        assert!(!map.is_land(Cell::new(9, 9)));
    }

    #[test]
    fn test_generate_deterministic() {
        let params = MapParams {
            width: 48,
            height: 32,
            seed: 7,
        };
        assert_eq!(TerrainMap::generate(params), TerrainMap::generate(params));
    }

    #[test]
    fn test_generate_pinned_layout() {
        let map = TerrainMap::generate(MapParams {
            width: 16,
            height: 16,
            seed: 5,
        });
        // One lake of radius 1 centred on (4, 6).
        for cell in [(4, 6), (3, 6), (5, 6), (4, 5), (4, 7)] {
            assert_eq!(
                map.terrain(Cell::new(cell.0, cell.1)),
                Some(Terrain::Water),
                "{cell:?}"
            );
        }
        assert!(map.is_land(Cell::new(3, 5)));
        assert_eq!(map.land_count(), 14 * 14 - 5);
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        let zero_width = MapParams {
            width: 0,
            ..MapParams::default()
        };
        let zero_height = MapParams {
            height: 0,
            ..MapParams::default()
        };
        assert!(zero_width.validate().is_err());
        assert!(TerrainMap::try_generate(zero_height).is_err());
        assert!(TerrainMap::try_generate(MapParams::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized() {
        let params = MapParams {
            width: MAX_MAP_DIMENSION + 1,
            ..MapParams::default()
        };
        assert!(matches!(params.validate(), Err(GameError::InvalidState(_))));
    }

    #[test]
    fn test_generate_ocean_border() {
        let map = TerrainMap::generate(MapParams::default());
        assert_eq!(map.terrain(Cell::new(0, 0)), Some(Terrain::Water));
        assert_eq!(map.terrain(Cell::new(63, 10)), Some(Terrain::Water));
        assert!(map.land_count() > 0);
        assert!(map.land_count() < map.len());
    }

    #[test]
    fn test_neighbours_at_corner() {
        let map = TerrainMap::new(3, 3);
        let n: Vec<_> = map.neighbours(0).collect();
        assert_eq!(n, vec![1, 3]);
    }

    #[test]
    fn test_shore_detection() {
        let mut map = TerrainMap::new(3, 1);
        map.set_terrain(Cell::new(2, 0), Terrain::Water);
        assert!(!map.is_shore(0));
        assert!(map.is_shore(1));
        assert!(!map.is_shore(2));
    }
}
