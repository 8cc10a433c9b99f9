use std::fmt::Write;

use serde::Serialize;

use crate::models::{Course, DashboardState, DerivedStatistics, MonthlyCount, StatusCount};

const PLACEHOLDER: &str = "—";
const ACTIVE_DISPLAY_LIMIT: usize = 6;

fn date_label(value: Option<chrono::NaiveDateTime>) -> String {
    value
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn course_title(course: &Course) -> &str {
    course.fields.title.as_deref().unwrap_or("(untitled course)")
}

fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}

/// Plain-text overview printed by `summary` and `watch`.
pub fn render_summary(state: &DashboardState) -> String {
    let mut output = String::new();

    let stats = match state {
        DashboardState::Loading => {
            let _ = writeln!(output, "Loading records...");
            for label in ["Instructors", "Rooms", "Participants", "Courses", "Registrations", "Revenue"] {
                let _ = writeln!(output, "{label:<14} {PLACEHOLDER}");
            }
            return output;
        }
        DashboardState::Unavailable => {
            let _ = writeln!(output, "Statistics unavailable: the record service could not be read.");
            return output;
        }
        DashboardState::Ready(stats) => stats,
    };

    let counts = &stats.counts;
    let _ = writeln!(
        output,
        "{} courses · {} participants · {} registrations",
        counts.courses, counts.participants, counts.registrations
    );
    let _ = writeln!(output, "{:<14} {}", "Instructors", counts.instructors);
    let _ = writeln!(output, "{:<14} {}", "Rooms", counts.rooms);
    let _ = writeln!(output, "{:<14} {}", "Participants", counts.participants);
    let _ = writeln!(output, "{:<14} {}", "Courses", counts.courses);
    let _ = writeln!(output, "{:<14} {}", "Registrations", counts.registrations);
    let _ = writeln!(
        output,
        "{:<14} {} from {} paid registrations",
        "Revenue",
        format_amount(stats.revenue),
        stats.payments.paid
    );
    let _ = writeln!(
        output,
        "{:<14} {} paid / {} open ({:.0}%)",
        "Payments",
        stats.payments.paid,
        stats.payments.unpaid,
        stats.paid_ratio * 100.0
    );
    let _ = writeln!(output, "{:<14} {}", "Active", stats.active_courses.len());

    if !stats.upcoming_courses.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Upcoming:");
        for upcoming in &stats.upcoming_courses {
            let _ = writeln!(
                output,
                "- {} on {}",
                course_title(&upcoming.course),
                date_label(upcoming.course.fields.start_date)
            );
        }
    }

    output
}

/// Markdown dashboard written by `report`.
pub fn build_report(state: &DashboardState) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Course Dashboard");

    let stats = match state {
        DashboardState::Loading => {
            let _ = writeln!(output, "Loading records...");
            return output;
        }
        DashboardState::Unavailable => {
            let _ = writeln!(output, "Statistics unavailable: the record service could not be read.");
            return output;
        }
        DashboardState::Ready(stats) => stats,
    };

    let _ = writeln!(output, "Generated at {}", stats.computed_at.format("%Y-%m-%d %H:%M"));
    let _ = writeln!(output);
    write_overview(&mut output, stats);
    write_courses(&mut output, stats);
    write_registrations(&mut output, stats);
    output
}

fn write_overview(output: &mut String, stats: &DerivedStatistics) {
    let counts = &stats.counts;
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Instructors: {}", counts.instructors);
    let _ = writeln!(output, "- Rooms: {}", counts.rooms);
    let _ = writeln!(output, "- Participants: {}", counts.participants);
    let _ = writeln!(output, "- Courses: {}", counts.courses);
    let _ = writeln!(output, "- Registrations: {}", counts.registrations);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Payments");
    let _ = writeln!(
        output,
        "- Revenue (paid): {} from {} completed payments",
        format_amount(stats.revenue),
        stats.payments.paid
    );
    let _ = writeln!(
        output,
        "- Paid: {} / {} ({:.0}%)",
        stats.payments.paid,
        counts.registrations,
        stats.paid_ratio * 100.0
    );
    let _ = writeln!(output, "- Outstanding: {}", stats.payments.unpaid);

    if !stats.status_distribution.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Course Status");
        for entry in &stats.status_distribution {
            let _ = writeln!(output, "- {}: {}", entry.status.as_str(), entry.count);
        }
    }
}

fn write_courses(output: &mut String, stats: &DerivedStatistics) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Upcoming Courses");

    if stats.upcoming_courses.is_empty() {
        let _ = writeln!(output, "No upcoming courses.");
    } else {
        for upcoming in &stats.upcoming_courses {
            let course = &upcoming.course;
            let mut line = format!(
                "- {} on {}",
                course_title(course),
                date_label(course.fields.start_date)
            );
            if let Some(room) = &upcoming.room_name {
                let _ = write!(line, " in {room}");
            }
            if let Some(instructor) = &upcoming.instructor_name {
                let _ = write!(line, " with {instructor}");
            }
            if let Some(price) = course.fields.price {
                let _ = write!(line, " ({})", format_amount(price));
            }
            let _ = writeln!(output, "{line}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Running Courses ({} active)", stats.active_courses.len());

    if stats.active_courses.is_empty() {
        let _ = writeln!(output, "No running courses.");
    } else {
        for course in stats.active_courses.iter().take(ACTIVE_DISPLAY_LIMIT) {
            let mut line = format!(
                "- {} until {}",
                course_title(course),
                date_label(course.fields.end_date)
            );
            if let Some(capacity) = course.fields.capacity {
                let _ = write!(line, ", max. {capacity}");
            }
            let _ = writeln!(output, "{line}");
        }
    }
}

fn write_registrations(output: &mut String, stats: &DerivedStatistics) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Registrations");

    if stats.recent_registrations.is_empty() {
        let _ = writeln!(output, "No registrations yet.");
    } else {
        for recent in &stats.recent_registrations {
            let fields = &recent.registration.fields;
            let _ = writeln!(
                output,
                "- {} for {} on {}: {}",
                recent.participant_name.as_deref().unwrap_or(PLACEHOLDER),
                recent.course_title.as_deref().unwrap_or(PLACEHOLDER),
                date_label(fields.registered_at),
                if fields.is_paid() { "paid" } else { "open" }
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Registrations per Month");
    for month in &stats.monthly_trend {
        let _ = writeln!(output, "- {}: {}", month.label, month.count);
    }
}

#[derive(Serialize)]
struct TrendRow<'a> {
    month: &'a str,
    registrations: usize,
}

#[derive(Serialize)]
struct StatusRow {
    status: &'static str,
    courses: usize,
}

pub fn write_trend_csv<W: std::io::Write>(writer: W, trend: &[MonthlyCount]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for month in trend {
        csv.serialize(TrendRow {
            month: &month.label,
            registrations: month.count,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_status_csv<W: std::io::Write>(writer: W, distribution: &[StatusCount]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for entry in distribution {
        csv.serialize(StatusRow {
            status: entry.status.as_str(),
            courses: entry.count,
        })?;
    }
    csv.flush()?;
    Ok(())
}
