//! 任务优先队列

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use graphfusion_core::{GraphFusionError, Result};

use crate::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    seq: u64,
    task_id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 队列统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    /// 入队到出队的平均等待秒数
    pub avg_wait_time: f64,
}

/// 按优先级出队的任务队列，同优先级先进先出
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    tasks: HashMap<TaskId, Task>,
    completed: Vec<TaskId>,
    enqueued_at: HashMap<TaskId, DateTime<Utc>>,
    seq: u64,
    stats: QueueStats,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, task: Task) {
        self.seq += 1;
        self.heap.push(QueueEntry {
            priority: task.priority,
            seq: self.seq,
            task_id: task.id.clone(),
        });
        self.enqueued_at.insert(task.id.clone(), Utc::now());
        self.tasks.insert(task.id.clone(), task);
        self.stats.total_enqueued += 1;
    }

    /// 取出优先级最高的待执行任务，跳过已失效的条目
    pub fn get(&mut self) -> Option<Task> {
        while let Some(entry) = self.heap.pop() {
            let Some(task) = self.tasks.get(&entry.task_id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            let task = task.clone();
            if let Some(enqueued) = self.enqueued_at.remove(&task.id) {
                let wait = (Utc::now() - enqueued).num_milliseconds() as f64 / 1000.0;
                self.stats.total_dequeued += 1;
                let n = self.stats.total_dequeued as f64;
                self.stats.avg_wait_time += (wait - self.stats.avg_wait_time) / n;
            }
            return Some(task);
        }
        None
    }

    /// 替换已有任务的状态
    pub fn update_task(&mut self, task: Task) {
        if self.tasks.contains_key(&task.id) {
            self.tasks.insert(task.id.clone(), task);
        }
    }

    /// 记录完成，并从其他任务的依赖中移除
    pub fn complete_task(&mut self, id: &str) {
        if !self.completed.iter().any(|c| c == id) {
            self.completed.push(id.to_string());
        }
        if let Some(task) = self.tasks.get_mut(id)
            && task.status != TaskStatus::Completed
        {
            task.status = TaskStatus::Completed;
        }
        for task in self.tasks.values_mut() {
            task.remove_dependency(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.heap.iter().any(|entry| {
            self.tasks
                .get(&entry.task_id)
                .is_some_and(|t| t.status == TaskStatus::Pending)
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_completed(&self) -> &[TaskId] {
        &self.completed
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.tasks.clear();
        self.completed.clear();
        self.enqueued_at.clear();
    }

    pub fn serialize(&self) -> Result<Value> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| a.priority_order(b));
        Ok(json!({
            "tasks": tasks,
            "completed": self.completed,
            "stats": self.stats,
        }))
    }

    /// 从快照恢复，只有未完成的待执行任务重新入堆
    pub fn deserialize(value: Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Snapshot {
            #[serde(default)]
            tasks: Vec<Task>,
            #[serde(default)]
            completed: Vec<TaskId>,
            #[serde(default)]
            stats: QueueStats,
        }

        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|e| GraphFusionError::Task(format!("Invalid task queue state: {}", e)))?;

        let mut queue = Self::new();
        for task in snapshot.tasks {
            if snapshot.completed.contains(&task.id) || task.status != TaskStatus::Pending {
                queue.tasks.insert(task.id.clone(), task);
            } else {
                queue.put(task);
            }
        }
        queue.completed = snapshot.completed;
        queue.stats = snapshot.stats;
        Ok(queue)
    }
}
