
use leakdiff::LeakEnv;
use std::io::ErrorKind;

fn describe<T>(res: Result<T, ErrorKind>, f: impl FnOnce(T) -> String) -> String {
    match res {
        Ok(val) => f(val),
        Err(ErrorKind::PermissionDenied) => "<read error; are you root?>".to_string(),
        Err(ErrorKind::NotFound) => "<unavailable>".to_string(),
        Err(e) => format!("<{:?}>", e),
    }
}

fn main() {
    let num_cores = match LeakEnv::online_cores() {
        Some(n) => n.to_string(),
        None => "<unknown>".to_string(),
    };

    let isol = describe(LeakEnv::sysfs_isolated(), |s| s);
    let nohz = describe(LeakEnv::sysfs_nohz(), |s| s);
    let smt = describe(LeakEnv::sysfs_smt_enabled(), |en| match en {
        true => "enabled [!!]".to_string(),
        false => "disabled".to_string(),
    });
    let boost = describe(LeakEnv::sysfs_cpufreq_boost_enabled(), |en| match en {
        true => "enabled [!!]".to_string(),
        false => "disabled".to_string(),
    });
    let gov = describe(LeakEnv::sysfs_cpufreq_governor(0), |s| s);
    let paranoid = describe(LeakEnv::procfs_perf_event_paranoid(), |lvl| {
        if lvl > 1 {
            format!("{} [!!]", lvl)
        } else {
            lvl.to_string()
        }
    });

    let rdpmc = describe(LeakEnv::sysfs_rdpmc_enabled(), |en| match en {
        true => "enabled".to_string(),
        false => "disabled [!!]".to_string(),
    });

    println!("[*] 'leakdiff' environment summary:");
    println!("  {:<40}: {}", "online cores", num_cores);
    println!("  {:<40}: {}", "isolated cores", isol);
    println!("  {:<40}: {}", "nohz_full cores", nohz);
    println!("  {:<40}: {}", "simultaneous multithreading (SMT)", smt);
    println!("  {:<40}: {}", "cpufreq boost", boost);
    println!("  {:<40}: {}", "cpufreq scaling (core 0)", gov);
    println!("  {:<40}: {}", "kernel.perf_event_paranoid", paranoid);
    println!("  {:<40}: {}", "userspace rdpmc", rdpmc);
}
