use crate::game::constants::{MAP_COLS, MAP_ROWS};

/// Cell alphabet of the labeled grid. The asset is produced offline; anything
/// the parser does not recognize is treated as blocking furniture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    OuterWall,
    InaccessibleWall,
    RoomWall,
    Entrance,
    Furniture,
    Floor,
    SubRoom(u8),
}

impl Cell {
    fn from_char(value: char) -> Self {
        match value {
            'o' => Cell::OuterWall,
            'i' => Cell::InaccessibleWall,
            'r' => Cell::RoomWall,
            'e' => Cell::Entrance,
            'c' => Cell::Furniture,
            ' ' | '@' => Cell::Floor,
            '1'..='9' => Cell::SubRoom(value as u8 - b'0'),
            _ => Cell::Furniture,
        }
    }

    pub fn is_walkable(self) -> bool {
        matches!(self, Cell::Floor | Cell::Entrance | Cell::SubRoom(_))
    }
}

/// Immutable 250x400 grid. Rows shorter than the full width are padded with
/// floor, matching how the asset is authored.
#[derive(Debug)]
pub struct MapIndex {
    cells: Vec<Cell>,
}

impl MapIndex {
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_grid(include_str!("../../assets/map.txt"))
    }

    pub fn from_grid(raw: &str) -> anyhow::Result<Self> {
        let mut cells = vec![Cell::Floor; MAP_ROWS * MAP_COLS];
        let mut rows = 0usize;
        for (y, line) in raw.lines().take(MAP_ROWS).enumerate() {
            rows += 1;
            for (x, ch) in line.chars().take(MAP_COLS).enumerate() {
                cells[y * MAP_COLS + x] = Cell::from_char(ch);
            }
        }
        if rows == 0 {
            anyhow::bail!("map grid is empty");
        }
        Ok(Self { cells })
    }

    pub fn cell_at(&self, x: i32, y: i32) -> Option<Cell> {
        if x < 0 || y < 0 || x >= MAP_COLS as i32 || y >= MAP_ROWS as i32 {
            return None;
        }
        Some(self.cells[y as usize * MAP_COLS + x as usize])
    }

    /// True iff the full 3x3 avatar footprint centered at (x, y) is in bounds
    /// and walkable.
    pub fn avatar_fits_at(&self, x: i32, y: i32) -> bool {
        for dy in -1..=1 {
            for dx in -1..=1 {
                match self.cell_at(x + dx, y + dy) {
                    Some(cell) if cell.is_walkable() => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// The enclosed-region label at (x, y), or an empty string for hallway,
    /// walls, and out-of-bounds coordinates.
    pub fn sub_room_at(&self, x: i32, y: i32) -> String {
        match self.cell_at(x, y) {
            Some(Cell::SubRoom(label)) => label.to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(lines: &[&str]) -> MapIndex {
        MapIndex::from_grid(&lines.join("\n")).expect("grid")
    }

    #[test]
    fn classifies_cells() {
        let map = grid(&["oire", " @1c", "x"]);
        assert_eq!(map.cell_at(0, 0), Some(Cell::OuterWall));
        assert_eq!(map.cell_at(1, 0), Some(Cell::InaccessibleWall));
        assert_eq!(map.cell_at(2, 0), Some(Cell::RoomWall));
        assert_eq!(map.cell_at(3, 0), Some(Cell::Entrance));
        assert_eq!(map.cell_at(0, 1), Some(Cell::Floor));
        assert_eq!(map.cell_at(1, 1), Some(Cell::Floor));
        assert_eq!(map.cell_at(2, 1), Some(Cell::SubRoom(1)));
        assert_eq!(map.cell_at(3, 1), Some(Cell::Furniture));
        // unknown characters block
        assert_eq!(map.cell_at(0, 2), Some(Cell::Furniture));
    }

    #[test]
    fn empty_grid_is_an_error() {
        assert!(MapIndex::from_grid("").is_err());
    }

    #[test]
    fn short_rows_pad_with_floor() {
        let map = grid(&["o"]);
        assert_eq!(map.cell_at(399, 0), Some(Cell::Floor));
        assert_eq!(map.cell_at(10, 249), Some(Cell::Floor));
    }

    #[test]
    fn out_of_bounds_is_none() {
        let map = grid(&["o"]);
        assert_eq!(map.cell_at(-1, 0), None);
        assert_eq!(map.cell_at(0, -1), None);
        assert_eq!(map.cell_at(400, 0), None);
        assert_eq!(map.cell_at(0, 250), None);
    }

    #[test]
    fn footprint_rejects_walls_and_bounds() {
        let map = grid(&["o"]);
        // (0, 0) puts part of the footprint out of bounds.
        assert!(!map.avatar_fits_at(0, 0));
        // (1, 1) touches the wall cell at the origin.
        assert!(!map.avatar_fits_at(1, 1));
        assert!(map.avatar_fits_at(2, 2));
        assert!(map.avatar_fits_at(50, 50));
    }

    #[test]
    fn footprint_accepts_entrances_and_labels() {
        let map = grid(&["123", "e1e", "111"]);
        assert!(map.avatar_fits_at(1, 1));
    }

    #[test]
    fn sub_room_labels() {
        let map = grid(&[" 1", "r2"]);
        assert_eq!(map.sub_room_at(1, 0), "1");
        assert_eq!(map.sub_room_at(1, 1), "2");
        assert_eq!(map.sub_room_at(0, 0), "");
        assert_eq!(map.sub_room_at(0, 1), "");
        assert_eq!(map.sub_room_at(-5, 3), "");
    }

    #[test]
    fn embedded_map_loads_and_has_fallback_spawn_clear() {
        use crate::game::constants::{FALLBACK_SPAWN_X, FALLBACK_SPAWN_Y};
        let map = MapIndex::embedded().expect("embedded map");
        assert!(map.avatar_fits_at(FALLBACK_SPAWN_X, FALLBACK_SPAWN_Y));
    }
}
