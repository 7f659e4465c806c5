//! Identity of a single work-item within a launch
//!
//! Every index here is a triple ordered `[x, y, z]`. x is the fastest
//! changing dimension. A 1D launch simply has `y == z == 0` for every id and
//! sizes of 1 along y and z.

/// The identity of one work-item (aka logical thread).
///
/// A [`ThreadIds`] instance is created once per dispatch of a work-item and
/// never changes afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadIds {
    global_id: [usize; 3],
    local_id: [usize; 3],
    group_id: [usize; 3],
    local_group_size: [usize; 3],
    global_group_size: [usize; 3],
}

impl ThreadIds {
    /// construct the ids of the work-item at `local_id` within the work-group
    /// at `group_id`.
    ///
    /// The global id is derived as `group_id * local_group_size + local_id`
    /// along every dimension.
    pub fn new(
        group_id: [usize; 3],
        local_id: [usize; 3],
        local_group_size: [usize; 3],
        global_group_size: [usize; 3],
    ) -> Self {
        let mut global_id = [0; 3];
        for d in 0..3 {
            global_id[d] = group_id[d] * local_group_size[d] + local_id[d];
        }
        ThreadIds {
            global_id,
            local_id,
            group_id,
            local_group_size,
            global_group_size,
        }
    }

    pub fn global_id(&self) -> [usize; 3] {
        self.global_id
    }

    pub fn local_id(&self) -> [usize; 3] {
        self.local_id
    }

    pub fn group_id(&self) -> [usize; 3] {
        self.group_id
    }

    pub fn local_group_size(&self) -> [usize; 3] {
        self.local_group_size
    }

    pub fn global_group_size(&self) -> [usize; 3] {
        self.global_group_size
    }

    /// Position of the work-item within its group, flattened with x fastest
    pub fn flat_local_id(&self) -> usize {
        flatten(self.local_id, self.local_group_size)
    }

    /// Position of the work-item within the whole launch, flattened with x
    /// fastest
    pub fn flat_global_id(&self) -> usize {
        flatten(self.global_id, self.global_group_size)
    }
}

pub(crate) fn flatten(idx: [usize; 3], extent: [usize; 3]) -> usize {
    idx[0] + extent[0] * (idx[1] + extent[1] * idx[2])
}

/// Iterates over every index triple within `extent`, with x changing fastest
///
/// This is the order in which the emulator hands out work-groups and
/// work-items. Nothing is allowed to depend on it (groups make no ordering
/// guarantees relative to one another), but a fixed order makes the serial
/// executor reproducible.
#[derive(Clone, Debug)]
pub struct Coords {
    extent: [usize; 3],
    next: Option<[usize; 3]>,
}

impl Coords {
    pub fn new(extent: [usize; 3]) -> Self {
        let next = if extent.contains(&0) {
            None
        } else {
            Some([0, 0, 0])
        };
        Coords { extent, next }
    }
}

impl Iterator for Coords {
    type Item = [usize; 3];

    fn next(&mut self) -> Option<[usize; 3]> {
        let current = self.next?;
        let mut advanced = current;
        let mut d = 0;
        self.next = loop {
            if d == 3 {
                break None;
            }
            advanced[d] += 1;
            if advanced[d] < self.extent[d] {
                break Some(advanced);
            }
            advanced[d] = 0;
            d += 1;
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_id_derivation() {
        let ids = ThreadIds::new([2, 1, 0], [3, 0, 0], [4, 2, 1], [16, 4, 1]);
        assert_eq!(ids.global_id(), [11, 2, 0]);
        assert_eq!(ids.flat_local_id(), 3);
        assert_eq!(ids.flat_global_id(), 11 + 16 * 2);
    }

    #[test]
    fn coords_order_is_x_fastest() {
        let all: Vec<[usize; 3]> = Coords::new([2, 2, 1]).collect();
        assert_eq!(all, vec![[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]]);
        assert_eq!(Coords::new([3, 2, 2]).count(), 12);
        assert_eq!(Coords::new([3, 0, 1]).count(), 0);
    }
}
