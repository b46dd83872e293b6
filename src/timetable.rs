//! Timetable editing model: a combination's working copy of its weekly
//! schedule, mutated locally and confirmed against the system of record
//! through a `ScheduleMutationClient`.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const WEEKDAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

pub fn is_weekday(day: &str) -> bool {
    WEEKDAYS.contains(&day)
}

fn new_slot_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRef {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSlot {
    // Older payloads carry no slot id; generate one on read.
    #[serde(default = "new_slot_id")]
    pub id: String,
    pub subject: String,
    pub start_time: String,
    pub end_time: String,
    pub teacher: TeacherRef,
}

impl LessonSlot {
    pub fn new(subject: String, start_time: String, end_time: String, teacher: TeacherRef) -> Self {
        LessonSlot {
            id: new_slot_id(),
            subject,
            start_time,
            end_time,
            teacher,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEntry {
    pub day: String,
    pub schedule: Vec<LessonSlot>,
}

pub fn parse_timetable(raw: &str) -> anyhow::Result<Vec<DayEntry>> {
    Ok(serde_json::from_str(raw)?)
}

pub fn timetable_to_json(days: &[DayEntry]) -> anyhow::Result<String> {
    Ok(serde_json::to_string(days)?)
}

/// Appends `lesson` to the entry for `day`, creating the entry at the end
/// of the timetable if the day has none yet.
pub fn apply_add(days: &mut Vec<DayEntry>, day: &str, lesson: LessonSlot) {
    if let Some(entry) = days.iter_mut().find(|e| e.day == day) {
        entry.schedule.push(lesson);
    } else {
        days.push(DayEntry {
            day: day.to_string(),
            schedule: vec![lesson],
        });
    }
}

/// Replaces the slot with `slot_id` under `day`. The replacement keeps the
/// slot's id. Returns false when the day or slot is absent.
pub fn apply_update_by_id(
    days: &mut [DayEntry],
    day: &str,
    slot_id: &str,
    mut update: LessonSlot,
) -> bool {
    let Some(entry) = days.iter_mut().find(|e| e.day == day) else {
        return false;
    };
    let Some(slot) = entry.schedule.iter_mut().find(|s| s.id == slot_id) else {
        return false;
    };
    update.id = slot.id.clone();
    *slot = update;
    true
}

/// Removes the slot with `slot_id` under `day`, pruning the day entry when
/// its schedule empties. Returns false when the day or slot is absent.
pub fn apply_delete_by_id(days: &mut Vec<DayEntry>, day: &str, slot_id: &str) -> bool {
    let Some(day_index) = days.iter().position(|e| e.day == day) else {
        return false;
    };
    let entry = &mut days[day_index];
    let Some(slot_index) = entry.schedule.iter().position(|s| s.id == slot_id) else {
        return false;
    };
    entry.schedule.remove(slot_index);
    if entry.schedule.is_empty() {
        days.remove(day_index);
    }
    true
}

/// Removes the whole entry for `day`. Returns false when the day is absent.
pub fn apply_delete_day(days: &mut Vec<DayEntry>, day: &str) -> bool {
    let Some(day_index) = days.iter().position(|e| e.day == day) else {
        return false;
    };
    days.remove(day_index);
    true
}

/// Render model for the Day→Lesson grouping the dashboard draws. Slot ids
/// ride along so edit/delete affordances can address slots stably.
pub fn view_model(days: &[DayEntry]) -> serde_json::Value {
    let rendered: Vec<serde_json::Value> = days
        .iter()
        .map(|entry| {
            let lessons: Vec<serde_json::Value> = entry
                .schedule
                .iter()
                .map(|slot| {
                    json!({
                        "slotId": slot.id,
                        "subject": slot.subject,
                        "time": format!("{} - {}", slot.start_time, slot.end_time),
                        "teacher": format!("{} {}", slot.teacher.first_name, slot.teacher.last_name),
                        "teacherId": slot.teacher.id,
                    })
                })
                .collect();
            json!({
                "day": entry.day,
                "lessonCount": entry.schedule.len(),
                "lessons": lessons,
            })
        })
        .collect();
    json!({ "days": rendered })
}

/// The five mutation intents a timetable edit can produce. The store
/// applies each edit to its working copy first, then delegates here; a
/// failed delegate call reverts the working copy.
pub trait ScheduleMutationClient {
    /// First-ever timetable for a combination.
    fn assign(&mut self, combination_id: &str, timetable: &[DayEntry]) -> anyhow::Result<()>;
    /// Full-timetable replace for a combination that already has one.
    fn replace(&mut self, combination_id: &str, timetable: &[DayEntry]) -> anyhow::Result<()>;
    fn update_slot(
        &mut self,
        combination_id: &str,
        day: &str,
        slot_id: &str,
        update: &LessonSlot,
    ) -> anyhow::Result<()>;
    fn delete_slot(&mut self, combination_id: &str, day: &str, slot_id: &str)
        -> anyhow::Result<()>;
    fn delete_day(&mut self, combination_id: &str, day: &str) -> anyhow::Result<()>;
}

/// Working copy of one combination's timetable.
///
/// Mutations are optimistic: the local copy changes before the client call
/// settles, and is restored from a snapshot if the call fails, so the copy
/// never diverges silently from the record the client persisted.
pub struct TimetableStore<'a, C: ScheduleMutationClient> {
    combination_id: String,
    days: Vec<DayEntry>,
    client: &'a mut C,
}

impl<'a, C: ScheduleMutationClient> TimetableStore<'a, C> {
    pub fn new(combination_id: impl Into<String>, client: &'a mut C) -> Self {
        TimetableStore {
            combination_id: combination_id.into(),
            days: Vec::new(),
            client,
        }
    }

    /// Wholesale replace of the working copy. Trusts the caller's shape.
    pub fn load(&mut self, initial: Vec<DayEntry>) {
        self.days = initial;
    }

    pub fn days(&self) -> &[DayEntry] {
        &self.days
    }

    /// Adds a lesson under `day`. Picks the assign intent when the
    /// combination had no timetable before this call, replace otherwise.
    pub fn add_lesson(&mut self, day: &str, lesson: LessonSlot) -> anyhow::Result<()> {
        let had_timetable = !self.days.is_empty();
        let snapshot = self.days.clone();
        apply_add(&mut self.days, day, lesson);
        let outcome = if had_timetable {
            self.client.replace(&self.combination_id, &self.days)
        } else {
            self.client.assign(&self.combination_id, &self.days)
        };
        if let Err(e) = outcome {
            self.days = snapshot;
            return Err(e);
        }
        Ok(())
    }

    /// Positional update from a rendered snapshot of the timetable.
    pub fn update_lesson(
        &mut self,
        day_index: usize,
        schedule_index: usize,
        new_lesson: LessonSlot,
    ) -> anyhow::Result<()> {
        let (day, slot_id) = self.slot_at(day_index, schedule_index)?;
        self.update_lesson_by_id(&day, &slot_id, new_lesson)
    }

    pub fn update_lesson_by_id(
        &mut self,
        day: &str,
        slot_id: &str,
        new_lesson: LessonSlot,
    ) -> anyhow::Result<()> {
        let snapshot = self.days.clone();
        if !apply_update_by_id(&mut self.days, day, slot_id, new_lesson) {
            anyhow::bail!("no lesson {} under {}", slot_id, day);
        }
        let updated = self
            .days
            .iter()
            .find(|e| e.day == day)
            .and_then(|e| e.schedule.iter().find(|s| s.id == slot_id))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no lesson {} under {}", slot_id, day))?;
        if let Err(e) = self
            .client
            .update_slot(&self.combination_id, day, slot_id, &updated)
        {
            self.days = snapshot;
            return Err(e);
        }
        Ok(())
    }

    /// Positional delete. Pruning the emptied day entry happens both here
    /// and in the persisted copy, via the client's delete-slot intent.
    pub fn delete_lesson(&mut self, day_index: usize, schedule_index: usize) -> anyhow::Result<()> {
        let (day, slot_id) = self.slot_at(day_index, schedule_index)?;
        self.delete_lesson_by_id(&day, &slot_id)
    }

    pub fn delete_lesson_by_id(&mut self, day: &str, slot_id: &str) -> anyhow::Result<()> {
        let snapshot = self.days.clone();
        if !apply_delete_by_id(&mut self.days, day, slot_id) {
            anyhow::bail!("no lesson {} under {}", slot_id, day);
        }
        if let Err(e) = self.client.delete_slot(&self.combination_id, day, slot_id) {
            self.days = snapshot;
            return Err(e);
        }
        Ok(())
    }

    pub fn delete_day(&mut self, day_index: usize) -> anyhow::Result<()> {
        let day = self
            .days
            .get(day_index)
            .map(|e| e.day.clone())
            .ok_or_else(|| anyhow::anyhow!("no day entry at index {}", day_index))?;
        self.delete_day_by_name(&day)
    }

    pub fn delete_day_by_name(&mut self, day: &str) -> anyhow::Result<()> {
        let snapshot = self.days.clone();
        if !apply_delete_day(&mut self.days, day) {
            anyhow::bail!("no day entry for {}", day);
        }
        if let Err(e) = self.client.delete_day(&self.combination_id, day) {
            self.days = snapshot;
            return Err(e);
        }
        Ok(())
    }

    fn slot_at(&self, day_index: usize, schedule_index: usize) -> anyhow::Result<(String, String)> {
        let entry = self
            .days
            .get(day_index)
            .ok_or_else(|| anyhow::anyhow!("no day entry at index {}", day_index))?;
        let slot = entry
            .schedule
            .get(schedule_index)
            .ok_or_else(|| anyhow::anyhow!("no lesson at index {} on {}", schedule_index, entry.day))?;
        Ok((entry.day.clone(), slot.id.clone()))
    }
}

/// Mutation client backed by the workspace database: the combination's
/// `timetable_json` column is the record the working copies reconcile to.
pub struct SqliteScheduleClient<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteScheduleClient<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteScheduleClient { conn }
    }
}

/// Reads a combination's persisted timetable. `None` means the combination
/// row itself is missing.
pub fn load_timetable(
    conn: &Connection,
    combination_id: &str,
) -> anyhow::Result<Option<Vec<DayEntry>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT timetable_json FROM combinations WHERE id = ?",
            [combination_id],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(parse_timetable(&s)?)),
        None => Ok(None),
    }
}

fn save_timetable(
    conn: &Connection,
    combination_id: &str,
    days: &[DayEntry],
) -> anyhow::Result<()> {
    let changed = conn.execute(
        "UPDATE combinations SET timetable_json = ? WHERE id = ?",
        (timetable_to_json(days)?, combination_id),
    )?;
    if changed == 0 {
        anyhow::bail!("combination not found: {}", combination_id);
    }
    Ok(())
}

impl<'c> ScheduleMutationClient for SqliteScheduleClient<'c> {
    fn assign(&mut self, combination_id: &str, timetable: &[DayEntry]) -> anyhow::Result<()> {
        save_timetable(self.conn, combination_id, timetable)
    }

    fn replace(&mut self, combination_id: &str, timetable: &[DayEntry]) -> anyhow::Result<()> {
        save_timetable(self.conn, combination_id, timetable)
    }

    fn update_slot(
        &mut self,
        combination_id: &str,
        day: &str,
        slot_id: &str,
        update: &LessonSlot,
    ) -> anyhow::Result<()> {
        let mut days = load_timetable(self.conn, combination_id)?
            .ok_or_else(|| anyhow::anyhow!("combination not found: {}", combination_id))?;
        if !apply_update_by_id(&mut days, day, slot_id, update.clone()) {
            anyhow::bail!("no lesson {} under {}", slot_id, day);
        }
        save_timetable(self.conn, combination_id, &days)
    }

    fn delete_slot(
        &mut self,
        combination_id: &str,
        day: &str,
        slot_id: &str,
    ) -> anyhow::Result<()> {
        let mut days = load_timetable(self.conn, combination_id)?
            .ok_or_else(|| anyhow::anyhow!("combination not found: {}", combination_id))?;
        if !apply_delete_by_id(&mut days, day, slot_id) {
            anyhow::bail!("no lesson {} under {}", slot_id, day);
        }
        save_timetable(self.conn, combination_id, &days)
    }

    fn delete_day(&mut self, combination_id: &str, day: &str) -> anyhow::Result<()> {
        let mut days = load_timetable(self.conn, combination_id)?
            .ok_or_else(|| anyhow::anyhow!("combination not found: {}", combination_id))?;
        if !apply_delete_day(&mut days, day) {
            anyhow::bail!("no day entry for {}", day);
        }
        save_timetable(self.conn, combination_id, &days)
    }
}
