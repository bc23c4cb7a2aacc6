/// Values used when neither the config file nor the command line sets them.
pub struct DefaultsConfig {
    pub switching_type: &'static str,
    pub protocol: &'static str,
    pub steps: u64,
    pub qm_charge: i32,
    pub qm_multiplicity: u32,
    pub term_scale: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            switching_type: "switch",
            protocol: "md",
            steps: 1,
            qm_charge: 0,
            qm_multiplicity: 1,
            term_scale: 1.0,
        }
    }
}
