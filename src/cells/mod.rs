mod unit_cell;
pub use self::unit_cell::{CellShape, UnitCell};

mod grid;
pub use self::grid::{CellGrid, GridOptions};

mod list;
pub use self::list::{BuildAux, CellList, CellListPair, GridCell, ListOptions};
