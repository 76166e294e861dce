pub const CELLTRACE_DISPLAY_VERSION: &str = env!("CELLTRACE_DISPLAY_VERSION");
pub const CELLTRACE_BUILD_N: &str = env!("CELLTRACE_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "celltrace {}\nBuild {}\nCell lineage reconstruction for CellProfiler tracking tables",
        CELLTRACE_DISPLAY_VERSION, CELLTRACE_BUILD_N
    )
}
