use once_cell::sync::OnceCell;
use std::num::NonZeroU32;

static NUM_CORES: OnceCell<NonZeroU32> = OnceCell::new();

/// Retrieves the number of physical cores on the system, cached after the first call.
pub fn get_num_cores() -> NonZeroU32 {
    *NUM_CORES.get_or_init(|| {
        #[cfg(feature = "detect_num_cores")]
        {
            NonZeroU32::new(num_cpus::get_physical() as u32)
                .unwrap_or_else(|| NonZeroU32::new(1).unwrap())
        }

        #[cfg(not(feature = "detect_num_cores"))]
        {
            NonZeroU32::new(1).unwrap()
        }
    })
}
