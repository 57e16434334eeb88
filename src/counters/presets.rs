//! Preset counter vocabulary
//!
//! Codes use the `0x8000_0000` preset mask so they never clash with native
//! event codes a vendor backend might add later.

use super::CounterRef;

const PRESET_MASK: u32 = 0x8000_0000;

/// Static description of one counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterInfo {
    pub counter: CounterRef,
    pub name: &'static str,
    pub short_description: &'static str,
    pub long_description: &'static str,
}

const fn preset(
    index: u32,
    name: &'static str,
    short_description: &'static str,
    long_description: &'static str,
) -> CounterInfo {
    CounterInfo {
        counter: CounterRef(PRESET_MASK | index),
        name,
        short_description,
        long_description,
    }
}

pub const L1_DCM: CounterInfo = preset(
    0x00,
    "PAPI_L1_DCM",
    "L1D cache misses",
    "Level 1 data cache misses",
);
pub const L1_ICM: CounterInfo = preset(
    0x01,
    "PAPI_L1_ICM",
    "L1I cache misses",
    "Level 1 instruction cache misses",
);
pub const L2_DCM: CounterInfo = preset(
    0x02,
    "PAPI_L2_DCM",
    "L2D cache misses",
    "Level 2 data cache misses",
);
pub const L2_ICM: CounterInfo = preset(
    0x03,
    "PAPI_L2_ICM",
    "L2I cache misses",
    "Level 2 instruction cache misses",
);
pub const L1_TCM: CounterInfo = preset(
    0x06,
    "PAPI_L1_TCM",
    "L1 cache misses",
    "Level 1 cache misses",
);
pub const L2_TCM: CounterInfo = preset(
    0x07,
    "PAPI_L2_TCM",
    "L2 cache misses",
    "Level 2 cache misses",
);
pub const L3_TCM: CounterInfo = preset(
    0x08,
    "PAPI_L3_TCM",
    "L3 cache misses",
    "Level 3 cache misses",
);
pub const TLB_DM: CounterInfo = preset(
    0x14,
    "PAPI_TLB_DM",
    "Data TLB misses",
    "Data translation lookaside buffer misses",
);
pub const TLB_IM: CounterInfo = preset(
    0x15,
    "PAPI_TLB_IM",
    "Instr TLB misses",
    "Instruction translation lookaside buffer misses",
);
pub const STL_ICY: CounterInfo = preset(
    0x25,
    "PAPI_STL_ICY",
    "No instr issue",
    "Cycles with no instruction issue",
);
pub const BR_CN: CounterInfo = preset(
    0x2b,
    "PAPI_BR_CN",
    "Cond. branch",
    "Conditional branch instructions",
);
pub const BR_MSP: CounterInfo = preset(
    0x2e,
    "PAPI_BR_MSP",
    "Cond. branch mispredicted",
    "Conditional branch instructions mispredicted",
);
pub const TOT_INS: CounterInfo = preset(
    0x32,
    "PAPI_TOT_INS",
    "Instr completed",
    "Instructions completed",
);
pub const LD_INS: CounterInfo = preset(0x35, "PAPI_LD_INS", "Loads", "Load instructions");
pub const SR_INS: CounterInfo = preset(0x36, "PAPI_SR_INS", "Stores", "Store instructions");
pub const BR_INS: CounterInfo = preset(0x37, "PAPI_BR_INS", "Branches", "Branch instructions");
pub const TOT_CYC: CounterInfo = preset(0x3b, "PAPI_TOT_CYC", "Total cycles", "Total cycles");
pub const L3_TCA: CounterInfo = preset(
    0x5b,
    "PAPI_L3_TCA",
    "L3 cache accesses",
    "Level 3 total cache accesses",
);
pub const FP_OPS: CounterInfo = preset(
    0x66,
    "PAPI_FP_OPS",
    "FP operations",
    "Floating point operations",
);
pub const REF_CYC: CounterInfo = preset(
    0x6b,
    "PAPI_REF_CYC",
    "Reference cycles",
    "Reference clock cycles",
);

/// Every preset, ordered by code
pub const ALL: &[CounterInfo] = &[
    L1_DCM, L1_ICM, L2_DCM, L2_ICM, L1_TCM, L2_TCM, L3_TCM, TLB_DM, TLB_IM, STL_ICY, BR_CN,
    BR_MSP, TOT_INS, LD_INS, SR_INS, BR_INS, TOT_CYC, L3_TCA, FP_OPS, REF_CYC,
];
