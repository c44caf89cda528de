//! Verify that a PoolBox cannot outlive the pool that owns its slot.

use osal::pool::{PoolBox, ResourcePool};

fn main() {
    let boxed: PoolBox<'_, u32, 4> = {
        let pool = ResourcePool::<u32, 4>::new();
        pool.emplace(7).ok().unwrap()
        // pool is dropped here
    };

    // This should fail: the box points into the pool
    drop(boxed);
}
