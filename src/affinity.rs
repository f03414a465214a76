//! CPU pinning for the three per-core stage threads.

use log::warn;

/// Pin the current thread to logical core `core`. Pinning failure is not
/// fatal - the pipeline still runs, just without cache locality.
pub fn pin_to_core(core: usize) {
    let Some(core_ids) = core_affinity::get_core_ids() else {
        warn!("affinity: cannot enumerate cores, thread left unpinned");
        return;
    };
    let Some(&id) = core_ids.get(core) else {
        warn!("affinity: core {core} beyond available {}", core_ids.len());
        return;
    };
    if !core_affinity::set_for_current(id) {
        warn!("affinity: failed to pin to core {core}");
    }
}
