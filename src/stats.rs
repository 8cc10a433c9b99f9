use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{
    Course, CourseStatus, DerivedStatistics, EntityCounts, MonthlyCount, PaymentSplit,
    RecentRegistration, Registration, Snapshot, StatsConfig, StatusCount, UpcomingCourse,
};
use crate::resolve::{resolve, ResolveStrategy};

/// Derives every dashboard metric from one snapshot as of `now`.
pub fn derive(snapshot: &Snapshot, now: NaiveDateTime, config: &StatsConfig) -> DerivedStatistics {
    let strategy = config.strategy;
    let payments = payment_split(&snapshot.registrations);

    let upcoming_courses = upcoming_courses(
        &snapshot.courses,
        now,
        config.upcoming_window_days,
        config.upcoming_limit,
    )
    .into_iter()
    .map(|course| UpcomingCourse {
        room_name: course
            .fields
            .room
            .as_deref()
            .and_then(|reference| resolve(reference, &snapshot.rooms, strategy))
            .and_then(|room| room.fields.name.clone()),
        instructor_name: course
            .fields
            .instructor
            .as_deref()
            .and_then(|reference| resolve(reference, &snapshot.instructors, strategy))
            .and_then(|instructor| instructor.fields.name.clone()),
        course,
    })
    .collect();

    let recent_registrations = recent_registrations(&snapshot.registrations, config.recent_limit)
        .into_iter()
        .map(|registration| RecentRegistration {
            participant_name: registration
                .fields
                .participant
                .as_deref()
                .and_then(|reference| resolve(reference, &snapshot.participants, strategy))
                .and_then(|participant| participant.fields.name.clone()),
            course_title: registration
                .fields
                .course
                .as_deref()
                .and_then(|reference| resolve(reference, &snapshot.courses, strategy))
                .and_then(|course| course.fields.title.clone()),
            registration,
        })
        .collect();

    DerivedStatistics {
        computed_at: now,
        counts: EntityCounts {
            instructors: snapshot.instructors.len(),
            rooms: snapshot.rooms.len(),
            participants: snapshot.participants.len(),
            courses: snapshot.courses.len(),
            registrations: snapshot.registrations.len(),
        },
        active_courses: active_courses(&snapshot.courses, now),
        upcoming_courses,
        payments,
        paid_ratio: paid_ratio(payments),
        revenue: revenue(&snapshot.registrations, &snapshot.courses, strategy),
        recent_registrations,
        status_distribution: status_distribution(&snapshot.courses),
        monthly_trend: monthly_trend(&snapshot.registrations, now, config.trend_months),
    }
}

pub fn is_active(course: &Course, now: NaiveDateTime) -> bool {
    match course.fields.start_date {
        Some(start) => start < now && course.fields.end_date.map_or(true, |end| end > now),
        None => false,
    }
}

pub fn active_courses(courses: &[Course], now: NaiveDateTime) -> Vec<Course> {
    courses
        .iter()
        .filter(|course| is_active(course, now))
        .cloned()
        .collect()
}

pub fn upcoming_courses(
    courses: &[Course],
    now: NaiveDateTime,
    window_days: i64,
    limit: usize,
) -> Vec<Course> {
    let horizon = Duration::try_days(window_days.max(0))
        .and_then(|window| now.checked_add_signed(window))
        .unwrap_or(NaiveDateTime::MAX);
    let mut upcoming: Vec<Course> = courses
        .iter()
        .filter(|course| {
            course
                .fields
                .start_date
                .is_some_and(|start| start > now && start < horizon)
        })
        .cloned()
        .collect();

    upcoming.sort_by_key(|course| course.fields.start_date);
    upcoming.truncate(limit);
    upcoming
}

pub fn payment_split(registrations: &[Registration]) -> PaymentSplit {
    let paid = registrations
        .iter()
        .filter(|registration| registration.fields.is_paid())
        .count();

    PaymentSplit {
        paid,
        unpaid: registrations.len() - paid,
    }
}

pub fn paid_ratio(split: PaymentSplit) -> f64 {
    let total = split.paid + split.unpaid;
    if total == 0 {
        0.0
    } else {
        split.paid as f64 / total as f64
    }
}

pub fn revenue(registrations: &[Registration], courses: &[Course], strategy: ResolveStrategy) -> f64 {
    registrations
        .iter()
        .filter(|registration| registration.fields.is_paid())
        .filter_map(|registration| registration.fields.course.as_deref())
        .filter_map(|reference| resolve(reference, courses, strategy))
        .filter_map(|course| course.fields.billable_price())
        .sum()
}

/// Newest first; undated registrations sort last, ties keep input order.
pub fn recent_registrations(registrations: &[Registration], limit: usize) -> Vec<Registration> {
    let mut recent = registrations.to_vec();
    recent.sort_by(|a, b| b.fields.registered_at.cmp(&a.fields.registered_at));
    recent.truncate(limit);
    recent
}

pub fn status_distribution(courses: &[Course]) -> Vec<StatusCount> {
    CourseStatus::ALL
        .iter()
        .map(|status| StatusCount {
            status: *status,
            count: courses
                .iter()
                .filter(|course| course.fields.status.unwrap_or_default() == *status)
                .count(),
        })
        .filter(|entry| entry.count > 0)
        .collect()
}

/// Inclusive bounds of the calendar month starting at `month`.
pub fn month_bounds(month: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = month.and_time(NaiveTime::MIN);
    let next = month.checked_add_months(Months::new(1))?.and_time(NaiveTime::MIN);
    Some((start, next - Duration::nanoseconds(1)))
}

/// One bucket per calendar month, oldest first, ending with the month of `now`.
pub fn monthly_trend(registrations: &[Registration], now: NaiveDateTime, months: u32) -> Vec<MonthlyCount> {
    let Some(current) = NaiveDate::from_ymd_opt(now.year(), now.month(), 1) else {
        return Vec::new();
    };

    (0..months)
        .rev()
        .filter_map(|offset| current.checked_sub_months(Months::new(offset)))
        .filter_map(|month| {
            let (start, end) = month_bounds(month)?;
            let count = registrations
                .iter()
                .filter_map(|registration| registration.fields.registered_at)
                .filter(|at| *at >= start && *at <= end)
                .count();

            Some(MonthlyCount {
                month,
                label: month.format("%Y-%m").to_string(),
                count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseFields, Record, RegistrationFields};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn hex_id(n: u32) -> String {
        format!("{n:024x}")
    }

    fn sample_course(n: u32, start_days: Option<i64>, end_days: Option<i64>, price: Option<f64>) -> Course {
        Record {
            record_id: hex_id(n),
            createdat: None,
            updatedat: None,
            fields: CourseFields {
                title: Some(format!("Course {n}")),
                start_date: start_days.map(|days| now() + Duration::days(days)),
                end_date: end_days.map(|days| now() + Duration::days(days)),
                price,
                ..Default::default()
            },
        }
    }

    fn sample_registration(id: &str, course: Option<u32>, paid: Option<bool>, days_ago: Option<i64>) -> Registration {
        Record {
            record_id: id.to_string(),
            createdat: None,
            updatedat: None,
            fields: RegistrationFields {
                participant: None,
                course: course.map(|n| format!("https://records.example.com/records/{}", hex_id(n))),
                registered_at: days_ago.map(|days| now() - Duration::days(days)),
                paid,
            },
        }
    }

    fn ids<T>(records: &[Record<T>]) -> Vec<&str> {
        records.iter().map(|record| record.record_id.as_str()).collect()
    }

    #[test]
    fn example_scenario_matches_expected_metrics() {
        let a = sample_course(1, Some(-10), Some(20), Some(100.0));
        let b = sample_course(2, Some(40), None, Some(50.0));
        let c = sample_course(3, Some(-5), Some(-2), Some(75.0));
        let snapshot = Snapshot {
            courses: vec![a.clone(), b, c],
            registrations: vec![
                sample_registration("r1", Some(1), Some(true), Some(1)),
                sample_registration("r2", Some(3), Some(false), Some(2)),
            ],
            ..Default::default()
        };

        let stats = derive(&snapshot, now(), &StatsConfig::default());

        assert_eq!(ids(&stats.active_courses), vec![a.record_id.as_str()]);
        assert!(stats.upcoming_courses.is_empty());
        assert_eq!(stats.payments, PaymentSplit { paid: 1, unpaid: 1 });
        assert!((stats.revenue - 100.0).abs() < f64::EPSILON);
        assert!((stats.paid_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.counts.courses, 3);
        assert_eq!(stats.counts.registrations, 2);
    }

    #[test]
    fn active_requires_past_start_and_open_end() {
        let courses = vec![
            sample_course(1, Some(-3), None, None),
            sample_course(2, Some(3), Some(10), None),
            sample_course(3, Some(-10), Some(-1), None),
            sample_course(4, None, Some(10), None),
            sample_course(5, Some(0), Some(10), None),
            sample_course(6, Some(-3), Some(0), None),
        ];

        let active = active_courses(&courses, now());
        assert_eq!(ids(&active), vec![hex_id(1).as_str()]);
    }

    #[test]
    fn upcoming_is_sorted_windowed_and_capped() {
        let courses: Vec<Course> = [12, 3, 29, 30, 45, 1, 7, 20, -1]
            .iter()
            .enumerate()
            .map(|(n, days)| sample_course(n as u32, Some(*days), None, None))
            .collect();

        let upcoming = upcoming_courses(&courses, now(), 30, 5);
        let starts: Vec<i64> = upcoming
            .iter()
            .map(|course| (course.fields.start_date.unwrap() - now()).num_days())
            .collect();

        assert_eq!(starts, vec![1, 3, 7, 12, 20]);
        assert!(upcoming.len() <= 5);
    }

    #[test]
    fn upcoming_window_bounds_are_exclusive() {
        let courses = vec![
            sample_course(1, Some(30), None, None),
            sample_course(2, Some(0), None, None),
        ];
        assert!(upcoming_courses(&courses, now(), 30, 5).is_empty());
    }

    #[test]
    fn huge_upcoming_window_saturates_instead_of_overflowing() {
        let courses = vec![
            sample_course(1, Some(3), None, None),
            sample_course(2, Some(-3), None, None),
        ];

        for window in [100_000_000, i64::MAX] {
            let upcoming = upcoming_courses(&courses, now(), window, 5);
            assert_eq!(ids(&upcoming), vec![hex_id(1).as_str()]);
        }
    }

    #[test]
    fn payment_split_sums_to_total() {
        let registrations = vec![
            sample_registration("r1", None, Some(true), None),
            sample_registration("r2", None, Some(false), None),
            sample_registration("r3", None, None, None),
        ];

        let split = payment_split(&registrations);
        assert_eq!(split, PaymentSplit { paid: 1, unpaid: 2 });
        assert_eq!(split.paid + split.unpaid, registrations.len());
    }

    #[test]
    fn paid_ratio_is_zero_without_registrations() {
        assert_eq!(paid_ratio(payment_split(&[])), 0.0);
    }

    #[test]
    fn revenue_skips_unresolvable_and_unpriced_courses() {
        let courses = vec![
            sample_course(1, None, None, Some(120.0)),
            sample_course(2, None, None, None),
        ];
        let registrations = vec![
            sample_registration("r1", Some(1), Some(true), None),
            sample_registration("r2", Some(1), Some(true), None),
            sample_registration("r3", Some(2), Some(true), None),
            sample_registration("r4", Some(9), Some(true), None),
            sample_registration("r5", None, Some(true), None),
            sample_registration("r6", Some(1), None, None),
        ];

        let total = revenue(&registrations, &courses, ResolveStrategy::HexToken);
        assert!((total - 240.0).abs() < f64::EPSILON);
    }

    #[test]
    fn revenue_is_zero_when_nothing_resolves() {
        let registrations = vec![sample_registration("r1", Some(4), Some(true), None)];
        assert_eq!(revenue(&registrations, &[], ResolveStrategy::HexToken), 0.0);
    }

    #[test]
    fn recent_registrations_sort_newest_first_with_undated_last() {
        let registrations = vec![
            sample_registration("undated", None, None, None),
            sample_registration("old", None, None, Some(30)),
            sample_registration("tie-a", None, None, Some(2)),
            sample_registration("newest", None, None, Some(0)),
            sample_registration("tie-b", None, None, Some(2)),
            sample_registration("older", None, None, Some(10)),
        ];

        let recent = recent_registrations(&registrations, 5);
        assert_eq!(ids(&recent), vec!["newest", "tie-a", "tie-b", "older", "old"]);

        let all = recent_registrations(&registrations, 10);
        assert_eq!(all.last().map(|r| r.record_id.as_str()), Some("undated"));
    }

    #[test]
    fn monthly_trend_always_has_window_length() {
        let registrations = vec![
            sample_registration("r1", None, None, Some(0)),
            sample_registration("r2", None, None, Some(18)),
            sample_registration("r3", None, None, Some(20)),
            sample_registration("r4", None, None, Some(400)),
            sample_registration("r5", None, None, None),
        ];

        let trend = monthly_trend(&registrations, now(), 6);
        let labels: Vec<&str> = trend.iter().map(|m| m.label.as_str()).collect();
        let counts: Vec<usize> = trend.iter().map(|m| m.count).collect();

        assert_eq!(labels, vec!["2026-05", "2026-06", "2026-07", "2026-08", "2026-09", "2026-10"]);
        assert_eq!(counts, vec![0, 0, 0, 0, 1, 2]);
        assert!(monthly_trend(&[], now(), 6).iter().all(|m| m.count == 0));
        assert_eq!(monthly_trend(&[], now(), 6).len(), 6);
    }

    #[test]
    fn monthly_trend_counts_month_edges_in_their_own_bucket() {
        let at = |registration: &str, when: NaiveDateTime| {
            let mut registration = sample_registration(registration, None, None, None);
            registration.fields.registered_at = Some(when);
            registration
        };
        let september = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let registrations = vec![
            at("first-instant", september.and_time(NaiveTime::MIN)),
            at(
                "last-instant",
                NaiveDate::from_ymd_opt(2026, 9, 30)
                    .unwrap()
                    .and_hms_nano_opt(23, 59, 59, 999_999_999)
                    .unwrap(),
            ),
            at("october", NaiveDate::from_ymd_opt(2026, 10, 1).unwrap().and_time(NaiveTime::MIN)),
        ];

        let trend = monthly_trend(&registrations, now(), 2);
        assert_eq!(
            trend.iter().map(|m| (m.label.as_str(), m.count)).collect::<Vec<_>>(),
            vec![("2026-09", 2), ("2026-10", 1)]
        );
    }

    #[test]
    fn month_bounds_cover_the_last_instant() {
        let (start, end) = month_bounds(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()).unwrap();
        assert_eq!(start.date(), NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(end.date(), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
        assert_eq!(end.time(), NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap());
    }

    #[test]
    fn status_distribution_omits_empty_statuses() {
        let mut cancelled = sample_course(1, None, None, None);
        cancelled.fields.status = Some(CourseStatus::Cancelled);
        let mut active = sample_course(2, None, None, None);
        active.fields.status = Some(CourseStatus::Active);
        let unset = sample_course(3, None, None, None);

        let distribution = status_distribution(&[cancelled, active.clone(), unset, active]);
        assert_eq!(
            distribution,
            vec![
                StatusCount { status: CourseStatus::Planned, count: 1 },
                StatusCount { status: CourseStatus::Active, count: 2 },
                StatusCount { status: CourseStatus::Cancelled, count: 1 },
            ]
        );
    }

    #[test]
    fn derive_resolves_names_for_rendering() {
        use crate::models::{Instructor, InstructorFields, Participant, ParticipantFields};

        let mut course = sample_course(1, Some(3), None, Some(10.0));
        course.fields.instructor = Some(format!("/records/{}", hex_id(50)));
        let instructor: Instructor = Record {
            record_id: hex_id(50),
            createdat: None,
            updatedat: None,
            fields: InstructorFields {
                name: Some("Dana Ortiz".to_string()),
                ..Default::default()
            },
        };
        let participant: Participant = Record {
            record_id: hex_id(60),
            createdat: None,
            updatedat: None,
            fields: ParticipantFields {
                name: Some("Sam Rivera".to_string()),
                ..Default::default()
            },
        };
        let mut registration = sample_registration("r1", Some(1), Some(true), Some(1));
        registration.fields.participant = Some(format!("/records/{}", hex_id(60)));

        let snapshot = Snapshot {
            instructors: vec![instructor],
            participants: vec![participant],
            courses: vec![course],
            registrations: vec![registration],
            ..Default::default()
        };

        let stats = derive(&snapshot, now(), &StatsConfig::default());
        let upcoming = &stats.upcoming_courses[0];
        assert_eq!(upcoming.instructor_name.as_deref(), Some("Dana Ortiz"));
        assert_eq!(upcoming.room_name, None);

        let recent = &stats.recent_registrations[0];
        assert_eq!(recent.participant_name.as_deref(), Some("Sam Rivera"));
        assert_eq!(recent.course_title.as_deref(), Some("Course 1"));
    }

    #[test]
    fn derive_is_deterministic_for_fixed_now() {
        let snapshot = Snapshot {
            courses: vec![sample_course(1, Some(2), None, Some(5.0))],
            registrations: vec![sample_registration("r1", Some(1), Some(true), Some(3))],
            ..Default::default()
        };
        let config = StatsConfig::default();

        let first = serde_json::to_value(derive(&snapshot, now(), &config)).unwrap();
        let second = serde_json::to_value(derive(&snapshot, now(), &config)).unwrap();
        assert_eq!(first, second);
    }
}
