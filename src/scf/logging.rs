use crate::utils::Timer;
use log::{info, warn};

pub fn print_scf_init(max_iter: usize, rms_conv: f64, max_history: usize, dimension: usize) {
    info!("{:^80}", "");
    info!("{: ^80}", "SCF-Routine");
    info!("{:-^80}", "");
    info!("{: <25} {}", "max. iterations:", max_iter);
    info!("{: <25} {:.2e}", "rms convergence:", rms_conv);
    info!("{: <25} {}", "mixer history depth:", max_history);
    info!("{: <25} {}", "vector length:", dimension);
    info!("{:^80}", "");
    info!("{:-^62} ", "");
    info!(
        "{: <5} {: >18} {: >18} {: >18}",
        "Iter.", "rms deviation", "beta", "history"
    );
    info!("{:-^62} ", "");
}

pub fn print_iteration(iter: usize, rms: f64, beta: f64, count: usize) {
    info!(
        "{: >5} {:>18.10e} {:>18.6} {:>18}",
        iter + 1,
        rms,
        beta,
        count
    );
}

pub fn print_history_reset(iter: usize, reason: &str) {
    warn!(
        "iteration {}: {}; mixer history discarded, continuing with linear mixing",
        iter + 1,
        reason
    );
}

pub fn print_scf_end(timer: Timer, iterations: usize, rms: f64, short_circuited: bool) {
    info!("{:-^62} ", "");
    info!("{: ^62}", "SCF converged");
    info!("{:^80} ", "");
    info!("{: <25} {}", "iterations:", iterations);
    info!("{: <25} {:.10e}", "final rms deviation:", rms);
    if short_circuited {
        info!("residual below the mixing threshold, the last vector was not mixed");
    }
    info!("{:-<80} ", "");
    info!("{}", timer);
}
