use microverse_common::{SimParams, Vec2};

/// Occupancy of one grid cell: the `[start, start + count)` range of
/// `SpatialGrid::indices` holding the agents whose position maps to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellHeader {
    pub start: u32,
    pub count: u32,
}

/// Uniform grid over the (origin-centred) world, rebuilt from scratch with a
/// two-pass counting sort. Stale as soon as any referenced position changes.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cells_x: u32,
    cells_y: u32,
    inv_cell_size: f32,
    half_extent: Vec2,
    headers: Vec<CellHeader>,
    indices: Vec<u32>,
}

// Maps one coordinate to its cell column/row, clamping out-of-world values
// into the nearest valid cell.
#[inline(always)]
fn cell_coord(v: f32, half: f32, inv_cell_size: f32, cells: u32) -> i32 {
    let c = ((v + half) * inv_cell_size).floor();
    // NaN maps to cell 0 through the saturating float->int cast
    (c as i32).clamp(0, cells as i32 - 1)
}

impl SpatialGrid {
    /// Allocates header and index buffers for `agent_count` agents.
    pub fn new(params: &SimParams, agent_count: usize) -> Self {
        Self {
            cells_x: params.cells_x.max(1),
            cells_y: params.cells_y.max(1),
            inv_cell_size: params.inv_cell_size,
            half_extent: params.half_extent(),
            headers: vec![CellHeader::default(); params.num_cells.max(1) as usize],
            indices: vec![0; agent_count],
        }
    }

    pub fn cells_x(&self) -> u32 {
        self.cells_x
    }

    pub fn cells_y(&self) -> u32 {
        self.cells_y
    }

    pub fn headers(&self) -> &[CellHeader] {
        &self.headers
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Clamped (column, row) of the cell containing `pos`.
    #[inline(always)]
    pub fn cell_coords(&self, pos: Vec2) -> (i32, i32) {
        (
            cell_coord(pos.x, self.half_extent.x, self.inv_cell_size, self.cells_x),
            cell_coord(pos.y, self.half_extent.y, self.inv_cell_size, self.cells_y),
        )
    }

    /// Flat cell index for `pos`; always in range.
    #[inline(always)]
    pub fn cell_of(&self, pos: Vec2) -> usize {
        let (cx, cy) = self.cell_coords(pos);
        cy as usize * self.cells_x as usize + cx as usize
    }

    /// Agents bucketed into `cell` at the last rebuild.
    pub fn cell_slice(&self, cell: usize) -> &[u32] {
        let h = self.headers[cell];
        &self.indices[h.start as usize..(h.start + h.count) as usize]
    }

    /// Rebuilds headers and the flat index array from `positions`.
    ///
    /// Pass 1 counts occupancy per cell, pass 2 turns counts into exclusive
    /// prefix sums and scatters agent indices in ascending index order, so a
    /// cell's slice is sorted by agent index.
    pub fn rebuild(&mut self, positions: &[Vec2]) {
        if self.indices.len() != positions.len() {
            // Only happens when the population size changes, never per tick.
            self.indices.resize(positions.len(), 0);
        }

        // Pass 1: occupancy
        for header in self.headers.iter_mut() {
            *header = CellHeader::default();
        }
        for &pos in positions {
            let cell = self.cell_of(pos);
            self.headers[cell].count += 1;
        }

        // Pass 2: prefix sum, then scatter
        let mut running = 0u32;
        for header in self.headers.iter_mut() {
            header.start = running;
            running += header.count;
            header.count = 0;
        }
        for (agent_idx, &pos) in positions.iter().enumerate() {
            let cell = self.cell_of(pos);
            let header = &mut self.headers[cell];
            self.indices[(header.start + header.count) as usize] = agent_idx as u32;
            header.count += 1;
        }
    }

    /// Calls `f` for every agent bucketed in the 3x3 block of cells around
    /// `pos`, including the querying agent itself. Callers filter self/Dead.
    #[inline(always)]
    pub fn for_each_neighbor<F>(&self, pos: Vec2, mut f: F)
    where
        F: FnMut(u32),
    {
        let (center_x, center_y) = self.cell_coords(pos);

        for dy in -1..=1 {
            for dx in -1..=1 {
                let check_x = center_x + dx;
                let check_y = center_y + dy;

                // Check if grid cell is within bounds
                if check_x < 0 || check_x >= self.cells_x as i32 || check_y < 0 || check_y >= self.cells_y as i32 {
                    continue;
                }
                let cell = check_y as usize * self.cells_x as usize + check_x as usize;
                for &neighbor_idx in self.cell_slice(cell) {
                    f(neighbor_idx);
                }
            }
        }
    }
}
