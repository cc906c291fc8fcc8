//! 冲突检测与解决
//!
//! 以镜像名称为粒度比较本地与远端快照。两个函数都是纯函数：
//! 输入相同则输出相同，输出的快照总是规范化（按名称排序）的。

use crate::models::{
    Conflict, ConflictKind, ConflictResolution, MergeStrategy, MirrorProfile, SystemSnapshot,
};
use std::collections::BTreeSet;

/// 检测本地与远端快照之间的冲突
///
/// - 只在远端存在 → `new_remote`
/// - 只在本地存在 → 不记录（所有策略都会保留）
/// - 两边都有且除 `api_key` 外有字段不同 → `modified`
pub fn detect_conflicts(local: &SystemSnapshot, remote: &SystemSnapshot) -> ConflictResolution {
    detect(local, remote, None)
}

/// 带同步基线的冲突检测
///
/// `base` 是上一次成功同步时的镜像名称。本地独有、但曾经同步过的镜像
/// 说明已被其他设备从远端删除，记为 `removed_remote`。
pub fn detect_conflicts_with_base(
    local: &SystemSnapshot,
    remote: &SystemSnapshot,
    base: &[String],
) -> ConflictResolution {
    let base: BTreeSet<&str> = base.iter().map(String::as_str).collect();
    detect(local, remote, Some(&base))
}

fn detect(
    local: &SystemSnapshot,
    remote: &SystemSnapshot,
    base: Option<&BTreeSet<&str>>,
) -> ConflictResolution {
    let local = local.clone().normalized();
    let remote = remote.clone().normalized();

    let local_by_name = local.by_name();
    let remote_by_name = remote.by_name();
    let names: BTreeSet<&str> = local_by_name
        .keys()
        .chain(remote_by_name.keys())
        .copied()
        .collect();

    let mut conflicts = Vec::new();
    for name in names {
        let local_value = local_by_name.get(name).copied();
        let remote_value = remote_by_name.get(name).copied();

        let kind = match (local_value, remote_value) {
            (None, Some(_)) => Some(ConflictKind::NewRemote),
            (Some(l), Some(r)) if !l.same_settings(r) => Some(ConflictKind::Modified),
            (Some(_), None) if base.is_some_and(|b| b.contains(name)) => {
                Some(ConflictKind::RemovedRemote)
            }
            _ => None,
        };

        if let Some(kind) = kind {
            conflicts.push(Conflict {
                kind,
                profile_name: name.to_string(),
                local_value: local_value.cloned(),
                remote_value: remote_value.cloned(),
            });
        }
    }

    tracing::debug!(
        local = local.len(),
        remote = remote.len(),
        conflicts = conflicts.len(),
        "冲突检测完成"
    );

    ConflictResolution {
        conflicts,
        local,
        remote,
    }
}

/// 按策略解决冲突，返回新的本地快照
///
/// - `merge`: 名称取并集；两边都有时使用远端设置，本地 API Key 非空则保留本地 Key；
///   指针优先本地，其次远端
/// - `local`: 保留本地快照，只追加远端新增的镜像
/// - `remote`: 以远端为准（本地独有镜像被丢弃），同名镜像保留本地 API Key；
///   指针优先远端，其次本地
pub fn resolve_conflicts(resolution: &ConflictResolution, strategy: MergeStrategy) -> SystemSnapshot {
    let local = &resolution.local;
    let remote = &resolution.remote;

    let resolved = match strategy {
        MergeStrategy::Merge => {
            let remote_by_name = remote.by_name();
            let local_names = local.names();

            let mut mirrors: Vec<MirrorProfile> = local
                .mirrors
                .iter()
                .map(|l| match remote_by_name.get(l.name.as_str()) {
                    Some(r) => with_local_key(r, Some(l)),
                    None => l.clone(),
                })
                .collect();
            mirrors.extend(
                remote
                    .mirrors
                    .iter()
                    .filter(|r| !local_names.contains(&r.name))
                    .cloned(),
            );

            pick_pointers(mirrors, local, remote)
        }
        MergeStrategy::Local => {
            let local_names = local.names();
            let mut mirrors = local.mirrors.clone();
            mirrors.extend(
                remote
                    .mirrors
                    .iter()
                    .filter(|r| !local_names.contains(&r.name))
                    .cloned(),
            );
            SystemSnapshot::new(
                mirrors,
                local.current_codex.clone(),
                local.current_claude.clone(),
            )
        }
        MergeStrategy::Remote => {
            let local_by_name = local.by_name();
            let mirrors: Vec<MirrorProfile> = remote
                .mirrors
                .iter()
                .map(|r| with_local_key(r, local_by_name.get(r.name.as_str()).copied()))
                .collect();

            pick_pointers(mirrors, remote, local)
        }
    };

    tracing::debug!(
        strategy = strategy.as_str(),
        profiles = resolved.len(),
        "冲突已解决"
    );
    resolved
}

/// 远端设置 + 本地 API Key（本地 Key 为空时使用远端 Key）
fn with_local_key(remote: &MirrorProfile, local: Option<&MirrorProfile>) -> MirrorProfile {
    let mut merged = remote.clone();
    if let Some(local) = local.filter(|l| l.has_api_key()) {
        merged.api_key = local.api_key.clone();
    }
    merged
}

/// 每个指针先取 `primary`，在结果集中不存在时取 `fallback`，都不存在则清空
fn pick_pointers(
    mirrors: Vec<MirrorProfile>,
    primary: &SystemSnapshot,
    fallback: &SystemSnapshot,
) -> SystemSnapshot {
    let mut snapshot = SystemSnapshot::new(mirrors, None, None);
    snapshot.current_codex = snapshot
        .resolve_pointer(primary.current_codex.as_deref())
        .or_else(|| snapshot.resolve_pointer(fallback.current_codex.as_deref()));
    snapshot.current_claude = snapshot
        .resolve_pointer(primary.current_claude.as_deref())
        .or_else(|| snapshot.resolve_pointer(fallback.current_claude.as_deref()));
    snapshot
}
