//! Calendar-based renewal scheduling (§4.H). No pack crate implements
//! Python's `schedule` package, so the next-run calculation is done by hand
//! using `jiff`, the teacher's time library, then slept on with `tokio`.
use jiff::civil::{Time, Weekday};
use jiff::{Span, Zoned};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::{CertDeployError, Result};

/// Computes the next run instant for `renew_every`/`renew_unit`/`renew_at`,
/// relative to `now`. `renew_unit` is either a pluralized interval unit
/// (`"day"`/`"days"`, `"hour"`/`"hours"`, ...) or a weekday name.
pub fn next_run(config: &ServerConfig, now: &Zoned) -> Result<Zoned> {
    let unit = config.renew_unit.trim_end_matches('s');
    if let Some(weekday) = parse_weekday(unit) {
        return next_weekday_at(now, weekday, config.renew_at.as_deref());
    }
    match unit {
        "minute" => Ok(now.checked_add(Span::new().minutes(config.renew_every)).map_err(span_err)?),
        "hour" => Ok(now.checked_add(Span::new().hours(config.renew_every)).map_err(span_err)?),
        "day" => next_day_at(now, config.renew_every, config.renew_at.as_deref()),
        "week" => next_day_at(now, config.renew_every * 7, config.renew_at.as_deref()),
        other => Err(CertDeployError::config(format!(
            "renew_unit needs to be a day of the week or an interval unit, not: {other}"
        ))),
    }
}

fn span_err(err: jiff::Error) -> CertDeployError {
    CertDeployError::config(err.to_string())
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    Some(match s {
        "monday" => Weekday::Monday,
        "tuesday" => Weekday::Tuesday,
        "wednesday" => Weekday::Wednesday,
        "thursday" => Weekday::Thursday,
        "friday" => Weekday::Friday,
        "saturday" => Weekday::Saturday,
        "sunday" => Weekday::Sunday,
        _ => return None,
    })
}

fn next_weekday_at(now: &Zoned, weekday: Weekday, at: Option<&str>) -> Result<Zoned> {
    let time = parse_time_of_day(at)?;
    let mut candidate = now.date().to_zoned(now.time_zone().clone()).map_err(span_err)?;
    for _ in 0..8 {
        if candidate.date().weekday() == weekday {
            let at_time = candidate.date().to_zoned(now.time_zone().clone()).map_err(span_err)?
                .with().time(time).build().map_err(span_err)?;
            if &at_time > now {
                return Ok(at_time);
            }
        }
        candidate = candidate.checked_add(Span::new().days(1)).map_err(span_err)?;
    }
    Err(CertDeployError::config("could not compute next weekday run"))
}

fn next_day_at(now: &Zoned, every_days: i64, at: Option<&str>) -> Result<Zoned> {
    let time = parse_time_of_day(at)?;
    let today_at = now.with().time(time).build().map_err(span_err)?;
    if today_at > *now {
        return Ok(today_at);
    }
    Ok(today_at.checked_add(Span::new().days(every_days)).map_err(span_err)?)
}

/// Parses `renew_at`: `HH:MM` (or `:MM` for "minutes past the hour", treated
/// here as `now`'s hour with that minute). `None` means midnight.
fn parse_time_of_day(at: Option<&str>) -> Result<Time> {
    let Some(at) = at else {
        return Ok(Time::midnight());
    };
    let at = at.trim();
    if let Some(minute) = at.strip_prefix(':') {
        let minute: i8 = minute
            .parse()
            .map_err(|_| CertDeployError::config(format!("invalid renew_at: {at}")))?;
        return Time::new(0, minute, 0, 0).map_err(span_err);
    }
    let (hour, minute) = at
        .split_once(':')
        .ok_or_else(|| CertDeployError::config(format!("invalid renew_at: {at}")))?;
    let hour: i8 = hour
        .parse()
        .map_err(|_| CertDeployError::config(format!("invalid renew_at: {at}")))?;
    let minute: i8 = minute
        .parse()
        .map_err(|_| CertDeployError::config(format!("invalid renew_at: {at}")))?;
    Time::new(hour, minute, 0, 0).map_err(span_err)
}

/// Runs `config.renew_exec config.renew_args...` once, per the configured
/// timeout and `fail_fast`.
pub async fn renew_certs(config: &ServerConfig) -> Result<()> {
    debug!(exec = %config.renew_exec, args = ?config.renew_args, "checking for renewable certs");
    let mut command = tokio::process::Command::new(&config.renew_exec);
    command.args(&config.renew_args);
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    let output = match config.renew_timeout {
        None => command.output().await,
        Some(timeout) => match tokio::time::timeout(timeout, command.output()).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "renew command did not finish in time",
            )),
        },
    };
    match output {
        Err(err) => {
            let message = format!("{}: {err}", config.renew_exec);
            if config.fail_fast {
                return Err(CertDeployError::other(message));
            }
            error!("{message}");
            Ok(())
        }
        Ok(output) if !output.status.success() => {
            let message = format!(
                "{} exited with {}: {}",
                config.renew_exec,
                output.status,
                String::from_utf8_lossy(&output.stdout)
            );
            if config.fail_fast {
                return Err(CertDeployError::other(message));
            }
            error!("{message}");
            Ok(())
        }
        Ok(_) => {
            info!("checked for renewable certificates");
            Ok(())
        }
    }
}

/// Runs `renew_certs` on the schedule `config` describes, forever.
pub async fn serve_forever(config: ServerConfig) -> Result<()> {
    info!(every = config.renew_every, unit = %config.renew_unit, "starting renewal scheduler");
    loop {
        let now = Zoned::now();
        let next = next_run(&config, &now)?;
        let wait = next.duration_since(&now).unsigned_abs();
        debug!(?wait, "sleeping until next renewal attempt");
        tokio::time::sleep(wait).await;
        if let Err(err) = renew_certs(&config).await {
            error!(%err, "renew_certs failed");
            if config.fail_fast {
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_time_of_day_hh_mm() {
        let t = parse_time_of_day(Some("13:30")).unwrap();
        assert_eq!(t.hour(), 13);
        assert_eq!(t.minute(), 30);
    }

    #[test]
    fn parse_time_of_day_defaults_to_midnight() {
        let t = parse_time_of_day(None).unwrap();
        assert_eq!(t, Time::midnight());
    }

    #[test]
    fn parse_weekday_known_names() {
        assert_eq!(parse_weekday("monday"), Some(Weekday::Monday));
        assert_eq!(parse_weekday("not-a-day"), None);
    }
}
