//! Schedule command handlers. Pure conversions, no hub connection.

use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;

use hubsync_core::ScheduleLimits;
use hubsync_core::schedule::{
    SimpleWeekdayData, WeekdayData, canonical_to_simple, normalize_weekday, simple_from_wire,
    simple_to_canonical, simple_to_wire, slots_from_wire, slots_to_wire,
};

use crate::cli::{ScheduleArgs, ScheduleCommand, ScheduleInput};
use crate::error::CliError;

pub fn handle(args: &ScheduleArgs) -> Result<(), CliError> {
    let rendered = match &args.command {
        ScheduleCommand::Normalize(input) => {
            let data: WeekdayData = read_json(&input.file)?;
            let slots = normalize_weekday(&slots_from_wire(&data)?, &limits(input))?;
            serde_json::to_string_pretty(&slots_to_wire(&slots))?
        }
        ScheduleCommand::FromSimple(input) => {
            let data: SimpleWeekdayData = read_json(&input.file)?;
            let slots = simple_to_canonical(&simple_from_wire(&data)?, &limits(input))?;
            serde_json::to_string_pretty(&slots_to_wire(&slots))?
        }
        ScheduleCommand::ToSimple(input) => {
            let data: WeekdayData = read_json(&input.file)?;
            let slots = normalize_weekday(&slots_from_wire(&data)?, &limits(input))?;
            serde_json::to_string_pretty(&simple_to_wire(&canonical_to_simple(&slots)?))?
        }
    };
    println!("{rendered}");
    Ok(())
}

fn limits(input: &ScheduleInput) -> ScheduleLimits {
    ScheduleLimits::new(input.capacity, input.min_temp, input.max_temp)
}

/// Read and parse a JSON document from `path`, or stdin for `-`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let mut contents = String::new();
    let read = if path.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut contents).map(|_| ())
    } else {
        std::fs::read_to_string(path).map(|text| contents = text)
    };
    read.map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), bytes = contents.len(), "read schedule input");
    serde_json::from_str(&contents).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
