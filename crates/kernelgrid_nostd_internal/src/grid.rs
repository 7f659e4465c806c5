//! Worker grids describe the iteration space of a kernel launch
//!
//! A grid has a *global work size* (the total number of work-items along
//! each dimension) and an optional *local work size* (the number of
//! work-items per work-group along each dimension). The number of groups is
//! always derived from those 2 quantities; we never store it, so it can't
//! fall out of sync.
//!
//! We don't support partial (aka tail) work-groups. The local work size must
//! evenly divide the global work size along every dimension. The reduction
//! kernels assume that every group has the same size, and silently padding
//! or truncating would give wrong answers.

use crate::ids::Coords;

/// The errors that can come up when validating a [`WorkerGrid`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("global work size is zero along dimension {dim}")]
    ZeroGlobal { dim: usize },
    #[error("local work size is zero along dimension {dim}")]
    ZeroLocal { dim: usize },
    #[error(
        "local work size {local} doesn't evenly divide global work size {global} along \
         dimension {dim}"
    )]
    Indivisible {
        dim: usize,
        global: usize,
        local: usize,
    },
    #[error(
        "dimension {dim} is inactive for a {dims}D grid, so its {what} work size must be 1 \
         (got {value})"
    )]
    InactiveDimension {
        dim: usize,
        dims: usize,
        what: &'static str,
        value: usize,
    },
    #[error("a work-group of {size} work-items exceeds the limit of {limit}")]
    GroupTooLarge { size: usize, limit: usize },
    #[error("the local work size was never set")]
    LocalUnset,
    #[error("the {what} work size {sizes:?} holds more work-items than a usize can count")]
    TooLarge {
        what: &'static str,
        sizes: [usize; 3],
    },
}

/// the number of index triples within `sizes`, or `None` on overflow
fn checked_product(sizes: [usize; 3]) -> Option<usize> {
    sizes.iter().try_fold(1_usize, |acc, &n| acc.checked_mul(n))
}

/// Describes the geometry of a kernel launch (1, 2 or 3 dimensions)
///
/// Sizes along dimensions beyond the grid's dimensionality are 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerGrid {
    dims: usize,
    global_work: [usize; 3],
    local_work: Option<[usize; 3]>,
}

impl WorkerGrid {
    pub fn new_1d(x: usize) -> Self {
        WorkerGrid {
            dims: 1,
            global_work: [x, 1, 1],
            local_work: None,
        }
    }

    pub fn new_2d(x: usize, y: usize) -> Self {
        WorkerGrid {
            dims: 2,
            global_work: [x, y, 1],
            local_work: None,
        }
    }

    pub fn new_3d(x: usize, y: usize, z: usize) -> Self {
        WorkerGrid {
            dims: 3,
            global_work: [x, y, z],
            local_work: None,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Records the global work size. Nothing is checked until validation.
    pub fn set_global_work(&mut self, x: usize, y: usize, z: usize) -> &mut Self {
        self.global_work = [x, y, z];
        self
    }

    /// Records the local work size. Nothing is checked until validation.
    pub fn set_local_work(&mut self, x: usize, y: usize, z: usize) -> &mut Self {
        self.local_work = Some([x, y, z]);
        self
    }

    /// Forget the local work size, so that the backend picks one
    pub fn clear_local_work(&mut self) -> &mut Self {
        self.local_work = None;
        self
    }

    pub fn global_work(&self) -> [usize; 3] {
        self.global_work
    }

    pub fn local_work(&self) -> Option<[usize; 3]> {
        self.local_work
    }

    /// Saturates at `usize::MAX` (a grid that large fails validation)
    pub fn n_work_items(&self) -> usize {
        checked_product(self.global_work).unwrap_or(usize::MAX)
    }

    /// The number of work-items per group (if the local work size is set).
    /// Saturates like [`WorkerGrid::n_work_items`].
    pub fn group_size(&self) -> Option<usize> {
        self.local_work
            .map(|local| checked_product(local).unwrap_or(usize::MAX))
    }

    /// Checks the invariants of the grid.
    ///
    /// An unset local work size is fine here (see
    /// [`WorkerGrid::with_local_size_chosen`]).
    pub fn validate(&self) -> Result<(), GridError> {
        for dim in 0..3 {
            let global = self.global_work[dim];
            if global == 0 {
                return Err(GridError::ZeroGlobal { dim });
            } else if dim >= self.dims && global != 1 {
                return Err(GridError::InactiveDimension {
                    dim,
                    dims: self.dims,
                    what: "global",
                    value: global,
                });
            }
        }
        if checked_product(self.global_work).is_none() {
            return Err(GridError::TooLarge {
                what: "global",
                sizes: self.global_work,
            });
        }

        if let Some(local_work) = self.local_work {
            if checked_product(local_work).is_none() {
                return Err(GridError::TooLarge {
                    what: "local",
                    sizes: local_work,
                });
            }
            for dim in 0..3 {
                let (global, local) = (self.global_work[dim], local_work[dim]);
                if local == 0 {
                    return Err(GridError::ZeroLocal { dim });
                } else if dim >= self.dims && local != 1 {
                    return Err(GridError::InactiveDimension {
                        dim,
                        dims: self.dims,
                        what: "local",
                        value: local,
                    });
                } else if global % local != 0 {
                    return Err(GridError::Indivisible { dim, global, local });
                }
            }
        }
        Ok(())
    }

    /// Like [`WorkerGrid::validate`], but also enforces a maximum group size
    pub fn validate_with_limit(&self, max_group_size: usize) -> Result<(), GridError> {
        self.validate()?;
        match self.group_size() {
            Some(size) if size > max_group_size => Err(GridError::GroupTooLarge {
                size,
                limit: max_group_size,
            }),
            _ => Ok(()),
        }
    }

    /// Returns the number of work-groups along each dimension.
    pub fn n_groups(&self) -> Result<[usize; 3], GridError> {
        self.validate()?;
        let local_work = self.local_work.ok_or(GridError::LocalUnset)?;
        let mut out = [1; 3];
        for dim in 0..3 {
            out[dim] = self.global_work[dim] / local_work[dim];
        }
        Ok(out)
    }

    /// Returns a copy of the grid where the local work size is filled in.
    ///
    /// When the local work size is already set, this is just a clone.
    /// Otherwise, along each active dimension (x first) we pick the largest
    /// power of two that divides the global work size while keeping the
    /// total group size no larger than `max_group_size`.
    pub fn with_local_size_chosen(&self, max_group_size: usize) -> WorkerGrid {
        let mut out = self.clone();
        if out.local_work.is_none() {
            let mut budget = max_group_size.max(1);
            let mut local = [1; 3];
            for dim in 0..self.dims {
                let global = self.global_work[dim];
                let mut candidate = 1;
                while (candidate * 2) <= budget && global % (candidate * 2) == 0 {
                    candidate *= 2;
                }
                local[dim] = candidate;
                budget /= candidate;
            }
            out.local_work = Some(local);
        }
        out
    }

    /// Resolve the grid into the concrete shape of a launch.
    pub fn launch_geometry(&self) -> Result<LaunchGeometry, GridError> {
        let n_groups = self.n_groups()?;
        let local = self.local_work.ok_or(GridError::LocalUnset)?;
        Ok(LaunchGeometry {
            global: self.global_work,
            local,
            n_groups,
        })
    }
}

/// The fully-resolved shape of a launch: every size is known and the local
/// size divides the global size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchGeometry {
    global: [usize; 3],
    local: [usize; 3],
    n_groups: [usize; 3],
}

impl LaunchGeometry {
    pub fn global(&self) -> [usize; 3] {
        self.global
    }

    pub fn local(&self) -> [usize; 3] {
        self.local
    }

    pub fn n_groups(&self) -> [usize; 3] {
        self.n_groups
    }

    // the products below can't overflow: the grid passed validation, so the
    // global size fits in a usize and the other sizes divide it

    pub fn group_size(&self) -> usize {
        self.local.iter().product()
    }

    pub fn total_groups(&self) -> usize {
        self.n_groups.iter().product()
    }

    pub fn n_work_items(&self) -> usize {
        self.global.iter().product()
    }

    /// iterate over the ids of every group
    pub fn groups(&self) -> Coords {
        Coords::new(self.n_groups)
    }

    /// iterate over the local ids of every member of a single group
    pub fn members(&self) -> Coords {
        Coords::new(self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_what_was_set() {
        let mut grid = WorkerGrid::new_1d(1024);
        grid.set_global_work(512, 1, 1).set_local_work(64, 1, 1);
        assert_eq!(grid.global_work(), [512, 1, 1]);
        assert_eq!(grid.local_work(), Some([64, 1, 1]));
        assert_eq!(grid.n_groups(), Ok([8, 1, 1]));
    }

    #[test]
    fn rejects_partial_groups() {
        let mut grid = WorkerGrid::new_2d(16, 10);
        grid.set_local_work(4, 4, 1);
        assert_eq!(
            grid.validate(),
            Err(GridError::Indivisible {
                dim: 1,
                global: 10,
                local: 4
            })
        );
        assert!(grid.n_groups().is_err());
    }

    #[test]
    fn rejects_zero_and_inactive_sizes() {
        assert_eq!(
            WorkerGrid::new_1d(0).validate(),
            Err(GridError::ZeroGlobal { dim: 0 })
        );
        let mut grid = WorkerGrid::new_1d(8);
        grid.set_local_work(0, 1, 1);
        assert_eq!(grid.validate(), Err(GridError::ZeroLocal { dim: 0 }));

        let mut grid = WorkerGrid::new_1d(8);
        grid.set_global_work(8, 2, 1);
        assert!(matches!(
            grid.validate(),
            Err(GridError::InactiveDimension { dim: 1, .. })
        ));
    }

    #[test]
    fn group_limit() {
        let mut grid = WorkerGrid::new_2d(64, 64);
        grid.set_local_work(32, 32, 1);
        assert!(grid.validate_with_limit(1024).is_ok());
        assert_eq!(
            grid.validate_with_limit(256),
            Err(GridError::GroupTooLarge {
                size: 1024,
                limit: 256
            })
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_grids_fail_validation() {
        let mut grid = WorkerGrid::new_2d(1 << 40, 1 << 40);
        grid.set_local_work(1 << 40, 1 << 40, 1);
        assert_eq!(grid.n_work_items(), usize::MAX);
        assert!(matches!(
            grid.validate(),
            Err(GridError::TooLarge { what: "global", .. })
        ));
        assert!(grid.validate_with_limit(1024).is_err());
        assert!(grid.launch_geometry().is_err());

        // a local size that overflows by itself is caught as well
        let mut grid = WorkerGrid::new_3d(1 << 20, 1 << 20, 1 << 20);
        grid.set_local_work(usize::MAX, usize::MAX, 1);
        assert!(grid.validate().is_err());
    }

    #[test]
    fn unset_local_size() {
        let grid = WorkerGrid::new_1d(96);
        assert_eq!(grid.n_groups(), Err(GridError::LocalUnset));

        // 32 is the largest power of 2 dividing 96
        let chosen = grid.with_local_size_chosen(256);
        assert_eq!(chosen.local_work(), Some([32, 1, 1]));

        let chosen = WorkerGrid::new_2d(64, 64).with_local_size_chosen(256);
        assert_eq!(chosen.local_work(), Some([64, 4, 1]));
        assert_eq!(chosen.n_groups(), Ok([1, 16, 1]));

        // an odd global size ends up with groups of a single work-item
        let chosen = WorkerGrid::new_1d(7).with_local_size_chosen(256);
        assert_eq!(chosen.local_work(), Some([1, 1, 1]));
    }

    #[test]
    fn geometry() {
        let mut grid = WorkerGrid::new_3d(8, 4, 2);
        grid.set_local_work(4, 2, 1);
        let geom = grid.launch_geometry().unwrap();
        assert_eq!(geom.n_groups(), [2, 2, 2]);
        assert_eq!(geom.total_groups(), 8);
        assert_eq!(geom.group_size(), 8);
        assert_eq!(geom.n_work_items(), 64);
        assert_eq!(geom.groups().count(), 8);
        assert_eq!(geom.members().count(), 8);
    }
}
